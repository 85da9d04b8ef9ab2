use crate::hunting::QueryResponse;
use anyhow::{bail, Context, Error};
use serde_json::Value;
use std::io::Write;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Format {
    Json,
    JsonLines,
    Tsv,
}

impl Default for Format {
    fn default() -> Format {
        Format::Json
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Format, Error> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "jsonl" | "ndjson" => Ok(Format::JsonLines),
            "tsv" => Ok(Format::Tsv),
            _ => bail!("unknown format {:?} (want json, jsonl or tsv)", s),
        }
    }
}

pub fn write<W: Write>(w: &mut W, format: Format, rsp: &QueryResponse) -> Result<(), Error> {
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut *w, &rsp.results).context("json serialize")?;
            writeln!(w)?;
        }
        Format::JsonLines => {
            for r in &rsp.results {
                serde_json::to_writer(&mut *w, r).context("json serialize")?;
                writeln!(w)?;
            }
        }
        Format::Tsv => {
            let columns = rsp.columns();
            if columns.is_empty() {
                return Ok(());
            }
            let header: Vec<String> = columns.iter().map(|c| escape(c.as_str())).collect();
            writeln!(w, "{}", header.join("\t"))?;
            for r in &rsp.results {
                let row: Vec<String> = columns
                    .iter()
                    .map(|c| cell(r.get(c.as_str())))
                    .collect();
                writeln!(w, "{}", row.join("\t"))?;
            }
        }
    }
    w.flush()?;
    Ok(())
}

fn cell(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => escape(s),
        Some(other) => escape(&other.to_string()),
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\t', "\\t")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response() -> QueryResponse {
        serde_json::from_value(json!({
            "Schema": [
                { "Name": "DeviceName", "Type": "String" },
                { "Name": "Count", "Type": "Int64" },
                { "Name": "Tags", "Type": "Dynamic" }
            ],
            "Results": [
                { "DeviceName": "host\ta", "Count": 3, "Tags": ["x", "y"] },
                { "DeviceName": "host-b", "Count": null }
            ]
        }))
        .unwrap()
    }

    fn render(format: Format, rsp: &QueryResponse) -> String {
        let mut buf = Vec::new();
        write(&mut buf, format, rsp).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn parse_format() {
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("JSONL".parse::<Format>().unwrap(), Format::JsonLines);
        assert_eq!("ndjson".parse::<Format>().unwrap(), Format::JsonLines);
        assert_eq!("tsv".parse::<Format>().unwrap(), Format::Tsv);
        assert!("csv".parse::<Format>().is_err());
    }

    #[test]
    fn json_is_array_of_records() {
        let out = render(Format::Json, &response());
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 2);
        assert_eq!(v[0]["Count"], json!(3));
    }

    #[test]
    fn jsonl_is_one_record_per_line() {
        let out = render(Format::JsonLines, &response());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["DeviceName"], json!("host-b"));
    }

    #[test]
    fn tsv_follows_schema_order() {
        let out = render(Format::Tsv, &response());
        assert_eq!(
            out,
            "DeviceName\tCount\tTags\n\
             host\\ta\t3\t[\"x\",\"y\"]\n\
             host-b\t\t\n"
        );
    }

    #[test]
    fn tsv_escapes_backslashes_and_control_chars() {
        let rsp: QueryResponse = serde_json::from_value(json!({
            "Results": [{ "Path": "C:\\Windows\\temp", "Cmd": "a\r\nb" }]
        }))
        .unwrap();
        assert_eq!(
            render(Format::Tsv, &rsp),
            "Path\tCmd\nC:\\\\Windows\\\\temp\ta\\r\\nb\n"
        );
    }

    #[test]
    fn tsv_of_empty_result_is_empty() {
        let rsp: QueryResponse = serde_json::from_value(json!({ "Results": [] })).unwrap();
        assert_eq!(render(Format::Tsv, &rsp), "");
    }
}
