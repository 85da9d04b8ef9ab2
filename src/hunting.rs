use crate::access_token::AccessToken;
use anyhow::{bail, Context, Error};
use log::{debug, info};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of a result set. Columns vary per query, so values stay loosely typed.
pub type Record = Map<String, Value>;

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    #[serde(rename = "Query")]
    query: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    #[serde(default, rename = "Schema", alias = "schema")]
    pub schema: Vec<Column>,
    #[serde(rename = "Results", alias = "results")]
    pub results: Vec<Record>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Column {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(default, rename = "Type", alias = "type")]
    pub kind: String,
}

impl QueryResponse {
    /// Column names in output order: the schema's, else the first record's keys
    /// in the order the API sent them.
    pub fn columns(&self) -> Vec<String> {
        if !self.schema.is_empty() {
            return self.schema.iter().map(|c| c.name.clone()).collect();
        }
        match self.results.first() {
            Some(r) => r.keys().cloned().collect(),
            None => Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Runs one advanced hunting query. The query text is sent as is.
pub async fn run_query(
    c: &Client,
    api_url: &str,
    token: &AccessToken,
    query: &str,
) -> Result<QueryResponse, Error> {
    if query.trim().is_empty() {
        bail!("empty query");
    }

    debug!("posting query ({} bytes) to {}", query.len(), api_url);
    let rsp = c
        .post(api_url)
        .bearer_auth(token.secret())
        .json(&QueryRequest { query })
        .send()
        .await
        .context("execute query request")?;

    let status = rsp.status();
    if !status.is_success() {
        let retry_after = rsp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = rsp.text().await.unwrap_or_default();
        let detail = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(b) => format!(": {}: {}", b.error.code, b.error.message),
            Err(_) => String::new(),
        };
        match status {
            StatusCode::UNAUTHORIZED => {
                bail!("query rejected token ({}){}", status, detail)
            }
            StatusCode::TOO_MANY_REQUESTS => match retry_after {
                Some(v) => bail!(
                    "rate limited ({}), retry after {}{}",
                    status,
                    retry_after_display(&v),
                    detail
                ),
                None => bail!("rate limited ({}){}", status, detail),
            },
            _ => bail!("bad status code: {}{}", status, detail),
        }
    }

    let rsp: QueryResponse = rsp.json().await.context("json deserialize results")?;
    info!(
        "query returned {} records, {} columns",
        rsp.results.len(),
        rsp.columns().len()
    );
    Ok(rsp)
}

/// Retry-After is either delta-seconds or an HTTP-date.
fn retry_after_display(v: &str) -> String {
    let v = v.trim();
    match v.parse::<u64>() {
        Ok(secs) => format!("{}s", secs),
        Err(_) => v.to_string(),
    }
}
