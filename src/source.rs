use crate::error::{ReportError, Result};
use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::path::PathBuf;

/// Where raw scanner entries come from.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_records(&self) -> Result<Vec<Value>>;

    fn describe(&self) -> String;
}

/// Extracts the record array from a feed document. Accepts a bare array or
/// an object wrapping it under `records` or `data`.
pub fn parse_feed(body: &str) -> Result<Vec<Value>> {
    let document: Value = serde_json::from_str(body)
        .map_err(|e| ReportError::DataUnavailable(format!("feed is not valid JSON: {}", e)))?;

    match document {
        Value::Array(entries) => Ok(entries),
        Value::Object(mut fields) => match fields
            .remove("records")
            .or_else(|| fields.remove("data"))
        {
            Some(Value::Array(entries)) => Ok(entries),
            _ => Err(ReportError::DataUnavailable(
                "feed object has no 'records' or 'data' array".to_string(),
            )),
        },
        _ => Err(ReportError::DataUnavailable(
            "feed must be a JSON array of records".to_string(),
        )),
    }
}

/// Reads a JSON scanner export from disk.
#[derive(Debug, Clone)]
pub struct FileRecordSource {
    path: PathBuf,
}

impl FileRecordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RecordSource for FileRecordSource {
    async fn fetch_records(&self) -> Result<Vec<Value>> {
        let body = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ReportError::DataUnavailable(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let records = parse_feed(&body)?;
        debug!("Read {} raw records from {}", records.len(), self.path.display());
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Serves a fixed snapshot, mostly for tests and previews.
#[derive(Debug, Clone, Default)]
pub struct StaticRecordSource {
    records: Vec<Value>,
}

impl StaticRecordSource {
    pub fn new(records: Vec<Value>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl RecordSource for StaticRecordSource {
    async fn fetch_records(&self) -> Result<Vec<Value>> {
        Ok(self.records.clone())
    }

    fn describe(&self) -> String {
        format!("static snapshot of {} records", self.records.len())
    }
}

#[cfg(feature = "http")]
pub use http::HttpRecordSource;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use reqwest::Client;

    /// Fetches the scanner feed from an HTTP endpoint returning JSON.
    #[derive(Clone)]
    pub struct HttpRecordSource {
        client: Client,
        url: String,
    }

    impl HttpRecordSource {
        pub fn new(url: impl Into<String>) -> Self {
            Self {
                client: Client::new(),
                url: url.into(),
            }
        }
    }

    #[async_trait]
    impl RecordSource for HttpRecordSource {
        async fn fetch_records(&self) -> Result<Vec<Value>> {
            let unavailable =
                |e: reqwest::Error| ReportError::DataUnavailable(format!("{}: {}", self.url, e));

            let res = self.client.get(&self.url).send().await.map_err(unavailable)?;
            let status = res.status();
            let body = res.text().await.map_err(unavailable)?;

            if !status.is_success() {
                return Err(ReportError::DataUnavailable(format!(
                    "{} answered with status {}: {}",
                    self.url, status, body
                )));
            }

            let records = parse_feed(&body)?;
            debug!("Fetched {} raw records from {}", records.len(), self.url);
            Ok(records)
        }

        fn describe(&self) -> String {
            format!("endpoint {}", self.url)
        }
    }
}
