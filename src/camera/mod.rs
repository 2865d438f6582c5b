pub mod still;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use still::StillCamera;

/// Which camera the caller would like. Backends treat it as a hint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FacingMode {
    /// Rear-facing camera, the one pointed at a patient's card.
    #[default]
    Environment,
    User,
}

impl FacingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacingMode::Environment => "environment",
            FacingMode::User => "user",
        }
    }
}

/// One sampled video frame as tightly packed RGBA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, CameraError> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(CameraError::Stream(format!(
                "frame buffer is {} bytes, expected {expected} for {width}x{height}",
                rgba.len()
            )));
        }
        Ok(Self { width, height, rgba })
    }

    /// Luma value of the pixel at (x, y), BT.601 weights.
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let r = self.rgba[idx] as u32;
        let g = self.rgba[idx + 1] as u32;
        let b = self.rgba[idx + 2] as u32;
        ((r * 299 + g * 587 + b * 114) / 1000) as u8
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("camera stream failed: {0}")]
    Stream(String),
}

/// Source of live video streams.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Ask the platform for a stream. Suspends until access is granted or refused.
    async fn acquire(&self, facing: FacingMode) -> Result<Box<dyn VideoStream>, CameraError>;
}

/// A granted camera stream. Owned by exactly one scan session.
pub trait VideoStream: Send {
    /// Copy the current frame out of the stream. `Ok(None)` means no frame is ready yet.
    fn read_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Stop every track and release the hardware. Must be idempotent.
    fn stop(&mut self);
}
