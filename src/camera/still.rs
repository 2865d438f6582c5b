use std::path::PathBuf;

use async_trait::async_trait;
use log::{debug, info};

use super::{Camera, CameraError, FacingMode, Frame, VideoStream};

/// Camera backend that replays still images as a video feed.
///
/// Every acquire decodes the images up front; the stream then hands them out
/// in order and wraps around, like a camera held over the same few cards.
pub struct StillCamera {
    paths: Vec<PathBuf>,
}

impl StillCamera {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl Camera for StillCamera {
    async fn acquire(&self, facing: FacingMode) -> Result<Box<dyn VideoStream>, CameraError> {
        if self.paths.is_empty() {
            return Err(CameraError::DeviceUnavailable(
                "no image sources configured".into(),
            ));
        }

        let paths = self.paths.clone();
        let frames = tokio::task::spawn_blocking(move || load_frames(&paths))
            .await
            .map_err(|err| CameraError::DeviceUnavailable(format!("image loader failed: {err}")))??;

        info!(
            "still camera granted ({} frames, facing hint {})",
            frames.len(),
            facing.as_str()
        );

        Ok(Box::new(StillStream {
            frames,
            cursor: 0,
            live: true,
        }))
    }
}

fn load_frames(paths: &[PathBuf]) -> Result<Vec<Frame>, CameraError> {
    paths
        .iter()
        .map(|path| {
            let img = image::open(path).map_err(|err| {
                CameraError::DeviceUnavailable(format!("cannot read {}: {err}", path.display()))
            })?;
            let rgba = img.to_rgba8();
            let (width, height) = rgba.dimensions();
            Frame::new(width, height, rgba.into_raw())
        })
        .collect()
}

struct StillStream {
    frames: Vec<Frame>,
    cursor: usize,
    live: bool,
}

impl VideoStream for StillStream {
    fn read_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if !self.live {
            return Err(CameraError::Stream("stream already stopped".into()));
        }
        if self.frames.is_empty() {
            return Ok(None);
        }
        let frame = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        Ok(Some(frame))
    }

    fn stop(&mut self) {
        if self.live {
            debug!("still camera stream stopped");
        }
        self.live = false;
        self.frames.clear();
    }
}
