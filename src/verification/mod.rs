//! One-time-password confirmation after a scan.
//!
//! Codes are issued and checked by an external verification service; this
//! crate only relays the challenge id and whatever the clinician typed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("verification service unavailable: {0}")]
    Unavailable(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for VerificationError {
    fn from(e: reqwest::Error) -> Self {
        VerificationError::Http(e.to_string())
    }
}

/// Handle for an issued code. The code itself never reaches this process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OtpChallenge {
    pub challenge_id: String,
    pub hid: String,
}

#[async_trait]
pub trait OtpVerifier: Send + Sync {
    /// Ask the service to send a code to the contact on file for `hid`.
    async fn request_code(&self, hid: &str) -> Result<OtpChallenge, VerificationError>;

    /// Check the code the clinician entered against an issued challenge.
    async fn verify(&self, challenge: &OtpChallenge, code: &str) -> Result<bool, VerificationError>;
}

pub struct HttpOtpVerifier {
    base_url: String,
    client: reqwest::Client,
}

impl HttpOtpVerifier {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn parse_challenge(&self, hid: &str, json: &Value) -> Result<OtpChallenge, VerificationError> {
        json.get("challengeId")
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .map(|id| OtpChallenge {
                challenge_id: id.to_string(),
                hid: hid.to_string(),
            })
            .ok_or_else(|| VerificationError::Parse("Missing 'challengeId' field".to_string()))
    }

    pub fn parse_verdict(&self, json: &Value) -> Result<bool, VerificationError> {
        json.get("verified")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| VerificationError::Parse("Missing 'verified' field".to_string()))
    }
}

#[async_trait]
impl OtpVerifier for HttpOtpVerifier {
    async fn request_code(&self, hid: &str) -> Result<OtpChallenge, VerificationError> {
        let body = serde_json::json!({ "hid": hid });

        let resp = self
            .client
            .post(format!("{}/otp/request", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| VerificationError::Unavailable(format!("otp request: {e}")))?
            .error_for_status()?;

        let json: Value = resp.json().await?;
        let challenge = self.parse_challenge(hid, &json)?;
        log_info!("otp challenge {} issued for HID {hid}", challenge.challenge_id);
        Ok(challenge)
    }

    async fn verify(&self, challenge: &OtpChallenge, code: &str) -> Result<bool, VerificationError> {
        let body = serde_json::json!({
            "challengeId": challenge.challenge_id,
            "code": code.trim(),
        });

        let resp = self
            .client
            .post(format!("{}/otp/verify", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| VerificationError::Unavailable(format!("otp verify: {e}")))?
            .error_for_status()?;

        let json: Value = resp.json().await?;
        let verified = self.parse_verdict(&json)?;
        if !verified {
            log_warn!("otp rejected for challenge {}", challenge.challenge_id);
        }
        Ok(verified)
    }
}
