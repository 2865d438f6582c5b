use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::camera::Frame;

/// Which luma polarities to try, mirroring the usual browser QR readers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum InversionAttempts {
    /// Dark modules on a light background only.
    #[default]
    DontInvert,
    OnlyInvert,
    AttemptBoth,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DecodeOptions {
    pub inversion: InversionAttempts,
}

/// Pure QR extraction from one frame.
///
/// `Ok(None)` is a miss. The payload is returned untouched; trimming and the
/// "empty means miss" rule belong to the scan loop.
pub trait QrDecoder: Send + Sync {
    fn decode(&self, frame: &Frame, options: &DecodeOptions) -> Result<Option<String>>;
}

/// Decoder backed by the `rqrr` grid detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct RqrrDecoder;

impl RqrrDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_polarity(&self, frame: &Frame, invert: bool) -> Option<String> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            frame.width as usize,
            frame.height as usize,
            |x, y| {
                let luma = frame.luma(x as u32, y as u32);
                if invert {
                    255 - luma
                } else {
                    luma
                }
            },
        );

        prepared
            .detect_grids()
            .into_iter()
            .find_map(|grid| match grid.decode() {
                Ok((_meta, content)) => Some(content),
                Err(err) => {
                    log::debug!("qr grid found but decode failed: {err:?}");
                    None
                }
            })
    }
}

impl QrDecoder for RqrrDecoder {
    fn decode(&self, frame: &Frame, options: &DecodeOptions) -> Result<Option<String>> {
        if frame.width == 0 || frame.height == 0 {
            return Ok(None);
        }

        let passes: &[bool] = match options.inversion {
            InversionAttempts::DontInvert => &[false],
            InversionAttempts::OnlyInvert => &[true],
            InversionAttempts::AttemptBoth => &[false, true],
        };

        Ok(passes
            .iter()
            .find_map(|&invert| self.decode_polarity(frame, invert)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Render `payload` as a QR code frame: `scale` px per module, 4-module quiet zone.
    pub(crate) fn qr_frame(payload: &str, scale: u32, inverted: bool) -> Frame {
        let code = qrcode::QrCode::new(payload.as_bytes()).unwrap();
        let modules = code.width() as u32;
        let colors = code.to_colors();
        let quiet = 4;
        let side = (modules + quiet * 2) * scale;

        let mut rgba = Vec::with_capacity((side * side * 4) as usize);
        for y in 0..side {
            for x in 0..side {
                let mx = (x / scale) as i64 - quiet as i64;
                let my = (y / scale) as i64 - quiet as i64;
                let inside = mx >= 0 && my >= 0 && mx < modules as i64 && my < modules as i64;
                let dark = inside
                    && colors[(my as u32 * modules + mx as u32) as usize] == qrcode::Color::Dark;
                let value = if dark != inverted { 0 } else { 255 };
                rgba.extend_from_slice(&[value, value, value, 255]);
            }
        }
        Frame::new(side, side, rgba).unwrap()
    }

    #[test]
    fn decodes_rendered_hid() {
        let frame = qr_frame("HID12345", 4, false);
        let text = RqrrDecoder::new()
            .decode(&frame, &DecodeOptions::default())
            .unwrap();
        assert_eq!(text.as_deref(), Some("HID12345"));
    }

    #[test]
    fn blank_frame_is_a_miss() {
        let frame = Frame::new(64, 64, vec![255; 64 * 64 * 4]).unwrap();
        let text = RqrrDecoder::new()
            .decode(&frame, &DecodeOptions::default())
            .unwrap();
        assert_eq!(text, None);
    }

    #[test]
    fn inverted_code_decodes_with_inversion_pass() {
        let frame = qr_frame("HID-INV-7", 4, true);
        let decoder = RqrrDecoder::new();

        let only = decoder
            .decode(&frame, &DecodeOptions { inversion: InversionAttempts::OnlyInvert })
            .unwrap();
        assert_eq!(only.as_deref(), Some("HID-INV-7"));

        let both = decoder
            .decode(&frame, &DecodeOptions { inversion: InversionAttempts::AttemptBoth })
            .unwrap();
        assert_eq!(both.as_deref(), Some("HID-INV-7"));
    }

    #[test]
    fn zero_sized_frame_is_a_miss() {
        let frame = Frame::new(0, 0, Vec::new()).unwrap();
        assert_eq!(
            RqrrDecoder::new()
                .decode(&frame, &DecodeOptions::default())
                .unwrap(),
            None
        );
    }
}
