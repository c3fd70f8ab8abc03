//! Live frame → encoded still image

use std::time::SystemTime;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use tracing::instrument;

use super::decoder;
use super::frame::{Frame, FrameDimensions, SampledFrame};
use crate::error::FrameError;

pub const DEFAULT_JPEG_QUALITY: u8 = 70;

/// Turns live frames into JPEG stills at the source's logical size
#[derive(Debug, Clone)]
pub struct FrameSampler {
    quality: u8,
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameSampler {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode one frame. `reported` is the size the live source reports,
    /// which may still be unknown on the first tick.
    #[instrument(skip(self, frame), fields(sequence = frame.meta.sequence))]
    pub fn capture(
        &self,
        frame: &Frame,
        reported: Option<FrameDimensions>,
    ) -> Result<SampledFrame, FrameError> {
        let dimensions = reported
            .filter(|d| !d.is_empty())
            .unwrap_or(FrameDimensions::FALLBACK);

        let decoded = decoder::decode_frame(frame)?;
        let buffer = if decoded.dimensions() == (dimensions.width, dimensions.height) {
            decoded
        } else {
            imageops::resize(
                &decoded,
                dimensions.width,
                dimensions.height,
                FilterType::Triangle,
            )
        };

        let mut jpeg = Vec::with_capacity(buffer.len() / 8);
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode_image(&buffer)?;

        Ok(SampledFrame {
            data: Bytes::from(jpeg),
            mime_type: "image/jpeg",
            sequence: frame.meta.sequence,
            captured_at: SystemTime::now(),
            dimensions,
        })
    }
}
