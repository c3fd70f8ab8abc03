use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDimensions {
    pub width: u32,
    pub height: u32,
}

impl FrameDimensions {
    /// Used when the live source has not reported a size yet
    pub const FALLBACK: FrameDimensions = FrameDimensions {
        width: 640,
        height: 480,
    };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Raw frame as delivered by a camera source.
///
/// Cloning is cheap; the preview tap and the sampler share one buffer.
#[derive(Clone)]
pub struct Frame {
    pub data: Bytes,
    pub meta: Arc<FrameMetadata>,
    /// When the frame was read from the source
    pub timestamp: Instant,
}

#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row for packed formats
    pub stride: u32,
    pub format: PixelFormat,
    /// Driver timestamp, when the device provides one
    pub device_timestamp: Option<Duration>,
}

impl Frame {
    pub fn new(data: Bytes, meta: FrameMetadata) -> Self {
        Self {
            data,
            meta: Arc::new(meta),
            timestamp: Instant::now(),
        }
    }

    pub fn dimensions(&self) -> FrameDimensions {
        FrameDimensions::new(self.meta.width, self.meta.height)
    }
}

/// Pixel layouts a camera source may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
}

/// Encoded still image ready for transmission.
///
/// Produced once per sampling tick and moved into a single analysis call.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub data: Bytes,
    pub mime_type: &'static str,
    pub sequence: u64,
    pub captured_at: SystemTime,
    /// Logical size used to map normalized landmarks back to pixels
    pub dimensions: FrameDimensions,
}

impl SampledFrame {
    pub fn file_name(&self) -> &'static str {
        match self.mime_type {
            "image/png" => "frame.png",
            _ => "frame.jpg",
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
