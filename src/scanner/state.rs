use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ScanState {
    #[default]
    Idle,
    /// Waiting on the platform to grant or refuse the camera.
    Requesting,
    Streaming,
    Decoded,
    Error,
}

impl ScanState {
    /// States in which a session holds (or is about to hold) a camera stream.
    pub fn is_active(&self) -> bool {
        matches!(self, ScanState::Requesting | ScanState::Streaming)
    }
}

/// Serializable view of the current scan session, published on every transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScanSnapshot {
    pub state: ScanState,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_decoded_text: Option<String>,
    pub error: Option<String>,
    pub ticks: u64,
}

impl ScanSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_session(&mut self, session_id: String, started_at: DateTime<Utc>) {
        *self = Self {
            state: ScanState::Requesting,
            session_id: Some(session_id),
            started_at: Some(started_at),
            last_decoded_text: None,
            error: None,
            ticks: 0,
        };
    }

    pub fn fail(&mut self, message: String) {
        self.state = ScanState::Error;
        self.error = Some(message);
    }

    /// Back to Idle. Keeps the last decoded text so a UI can still show what was read.
    pub fn reset(&mut self) {
        self.state = ScanState::Idle;
        self.error = None;
    }
}

/// How one streaming run of the capture loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Decoded(String),
    Cancelled,
    Failed(String),
}
