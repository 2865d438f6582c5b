//! What happens to an HID once the scanner has read it.
//!
//! Every scanner screen runs the same capture loop; they differ only in the
//! steps chained after the decode (open the patient record, send an OTP).

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::info;
use serde_json::Value;

use crate::records::RecordStore;
use crate::scanner::{ScanController, ScanOutcome};
use crate::verification::{OtpChallenge, OtpVerifier};

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Record(Value),
    RecordMissing,
    Challenge(OtpChallenge),
}

#[async_trait]
pub trait PostDecodeStep: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, hid: &str) -> Result<StepOutcome>;
}

pub struct RecordLookupStep {
    store: Arc<dyn RecordStore>,
}

impl RecordLookupStep {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PostDecodeStep for RecordLookupStep {
    fn name(&self) -> &str {
        "record-lookup"
    }

    async fn run(&self, hid: &str) -> Result<StepOutcome> {
        let record = self.store.fetch_patient(hid).await?;
        Ok(record.map_or(StepOutcome::RecordMissing, StepOutcome::Record))
    }
}

pub struct OtpChallengeStep {
    verifier: Arc<dyn OtpVerifier>,
}

impl OtpChallengeStep {
    pub fn new(verifier: Arc<dyn OtpVerifier>) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl PostDecodeStep for OtpChallengeStep {
    fn name(&self) -> &str {
        "otp-challenge"
    }

    async fn run(&self, hid: &str) -> Result<StepOutcome> {
        let challenge = self.verifier.request_code(hid).await?;
        Ok(StepOutcome::Challenge(challenge))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowResult {
    pub hid: String,
    pub steps: Vec<StepOutcome>,
}

/// Run one scan session to completion, then each step in order on the HID.
///
/// `Ok(None)` when the session was stopped before anything was read.
pub async fn scan_and_follow(
    controller: &ScanController,
    steps: &[Arc<dyn PostDecodeStep>],
) -> Result<Option<FlowResult>> {
    controller.start().await.context("failed to start scanning")?;

    let hid = match controller.wait().await? {
        ScanOutcome::Decoded(hid) => hid,
        ScanOutcome::Cancelled => return Ok(None),
        ScanOutcome::Failed(message) => return Err(anyhow!("scan failed: {message}")),
    };

    let mut outcomes = Vec::with_capacity(steps.len());
    for step in steps {
        info!("running post-decode step {} for HID {hid}", step.name());
        let outcome = step
            .run(&hid)
            .await
            .with_context(|| format!("post-decode step {} failed", step.name()))?;
        outcomes.push(outcome);
    }

    Ok(Some(FlowResult {
        hid,
        steps: outcomes,
    }))
}
