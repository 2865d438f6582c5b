//! Patient record lookup in the realtime database, keyed by HID.

pub mod render;

use async_trait::async_trait;
use serde_json::Value;

pub use render::render_record;

const ENABLE_LOGS: bool = true;

use crate::log_info;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("invalid HID '{0}'")]
    InvalidHid(String),
}

impl From<reqwest::Error> for RecordError {
    fn from(e: reqwest::Error) -> Self {
        RecordError::Http(e.to_string())
    }
}

/// Read side of the external patient store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the record stored under `hid`. `Ok(None)` when nothing is stored there.
    async fn fetch_patient(&self, hid: &str) -> Result<Option<Value>, RecordError>;
}

/// REST client for a Firebase-style realtime database (`{base}/user/{hid}.json`).
pub struct RealtimeDbStore {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl RealtimeDbStore {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            client: reqwest::Client::new(),
        }
    }

    pub fn patient_url(&self, hid: &str) -> Result<String, RecordError> {
        validate_hid(hid)?;
        Ok(format!("{}/user/{}.json", self.base_url, hid))
    }
}

/// HIDs become a path segment, so anything that would change the path is rejected.
fn validate_hid(hid: &str) -> Result<(), RecordError> {
    let forbidden = |c: char| matches!(c, '/' | '.' | '#' | '$' | '[' | ']' | '?') || c.is_whitespace();
    if hid.is_empty() || hid.chars().any(forbidden) {
        return Err(RecordError::InvalidHid(hid.to_string()));
    }
    Ok(())
}

/// The REST API answers a missing key with a literal `null` body.
pub fn parse_record(body: Value) -> Option<Value> {
    match body {
        Value::Null => None,
        other => Some(other),
    }
}

#[async_trait]
impl RecordStore for RealtimeDbStore {
    async fn fetch_patient(&self, hid: &str) -> Result<Option<Value>, RecordError> {
        let url = self.patient_url(hid)?;

        let mut request = self.client.get(&url);
        if let Some(token) = &self.auth_token {
            request = request.query(&[("auth", token)]);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| RecordError::Unavailable(format!("realtime db: {e}")))?
            .error_for_status()?;

        let body: Value = resp.json().await?;
        let record = parse_record(body);
        log_info!(
            "record lookup for HID {hid}: {}",
            if record.is_some() { "found" } else { "not found" }
        );
        Ok(record)
    }
}
