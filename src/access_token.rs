use crate::config::{Credentials, Endpoints};
use anyhow::{anyhow, bail, Context, Error};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;

pub const SERVICE_PRINCIPAL_INSTRUCTIONS: &str = r"1. register an application in the Azure portal under App registrations
2. under API permissions add the hunting permission (e.g. AdvancedQuery.Read.All) and grant admin consent
3. under Certificates & secrets create a client secret and save its value
4. note the Directory (tenant) ID and Application (client) ID from the Overview page
5. pass them as --tenant, --client-id, --client-secret or set HUNT_TENANT_ID, HUNT_CLIENT_ID, HUNT_CLIENT_SECRET";

/// Requests a token with the client-credentials grant.
pub async fn fetch(
    c: &Client,
    endpoints: &Endpoints,
    creds: &Credentials,
) -> Result<AccessToken, Error> {
    let form = [
        ("grant_type", "client_credentials"),
        ("resource", endpoints.resource.as_str()),
        ("client_id", creds.client_id.as_str()),
        ("client_secret", creds.client_secret.as_str()),
    ];

    debug!(
        "requesting token from {} for {}",
        endpoints.token_url, endpoints.resource
    );
    let rsp = c
        .post(&endpoints.token_url)
        .form(&form)
        .send()
        .await
        .context("execute token request")?;

    let status = rsp.status();
    let body = rsp.text().await.context("read token response")?;
    if !status.is_success() {
        if let Ok(e) = serde_json::from_str::<OAuthError>(&body) {
            bail!(
                "token request failed ({}): {}: {}",
                status,
                e.error,
                e.error_description.unwrap_or_default().trim()
            );
        }
        bail!("token request failed: bad response status: {}", status);
    }

    let rsp: TokenResponse = serde_json::from_str(&body).context("json deserialize token")?;
    AccessToken::from_response(rsp, Utc::now())
}

/// A bearer credential and, when the provider reported one, its expiry.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>) -> AccessToken {
        AccessToken {
            secret: secret.into(),
            expires_at: None,
        }
    }

    fn from_response(rsp: TokenResponse, now: DateTime<Utc>) -> Result<AccessToken, Error> {
        if rsp.access_token.is_empty() {
            return Err(anyhow!("token response has empty access_token"));
        }
        if let Some(kind) = &rsp.token_type {
            if !kind.eq_ignore_ascii_case("bearer") {
                debug!("unexpected token_type {:?}", kind);
            }
        }

        // prefer the absolute expires_on
        let TokenResponse {
            access_token,
            expires_in,
            expires_on,
            ..
        } = rsp;
        let expires_at = expires_on
            .and_then(|s| s.value())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                expires_in
                    .and_then(|s| s.value())
                    .and_then(Duration::try_seconds)
                    .and_then(|d| now.checked_add_signed(d))
            });

        Ok(AccessToken {
            secret: access_token,
            expires_at,
        })
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(t) => now >= t,
            None => false,
        }
    }

    /// Remaining lifetime, zero once expired.
    pub fn expires_in(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|t| std::cmp::max(t - now, Duration::zero()))
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<Seconds>,
    expires_on: Option<Seconds>,
}

/// The v1 endpoint sends lifetimes as numeric strings, v2 as numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(i64),
    Text(String),
}

impl Seconds {
    fn value(&self) -> Option<i64> {
        match self {
            Seconds::Number(n) => Some(*n),
            Seconds::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Deserialize)]
struct OAuthError {
    error: String,
    error_description: Option<String>,
}
