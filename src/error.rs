//! Error types for posecoach

use thiserror::Error;

/// Camera acquisition and capture errors
#[derive(Debug, Clone, Error)]
pub enum CameraError {
    /// The user or the OS refused access to the device
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No usable device at the requested path
    #[error("Camera not found: {0}")]
    NotFound(String),

    /// Device exists but cannot be configured for capture
    #[error("Unsupported camera: {0}")]
    Unsupported(String),

    /// Acquisition was abandoned because the session stopped
    #[error("Camera acquisition cancelled")]
    Cancelled,

    /// The session is not in a state that allows the operation
    #[error("Camera session is {0}")]
    InvalidState(&'static str),

    /// Device failure while streaming
    #[error("Camera device error: {0}")]
    Device(String),
}

impl CameraError {
    /// Map an I/O error raised while opening a device
    pub fn from_open(path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(format!("{path}: {err}")),
            std::io::ErrorKind::NotFound => Self::NotFound(format!("{path}: {err}")),
            _ => Self::Device(format!("{path}: {err}")),
        }
    }
}

/// Frame decode/encode errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("JPEG decode failed: {0}")]
    Decode(#[from] jpeg_decoder::Error),

    #[error("Image encode failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("Frame buffer too small: expected {expected} bytes, got {actual}")]
    ShortBuffer { expected: usize, actual: usize },
}

/// Errors from the vision analysis service client
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Network unreachable, connection reset, timeout or aborted request
    #[error("Network error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("{message}")]
    ServerStatus { status: u16, message: String },

    /// Success status with a body that violates the contract
    #[error("{0}")]
    ServerPayload(String),

    /// Success status with a zero-length body
    #[error("Server returned an empty result")]
    Empty,

    /// Rejected locally before any request was sent
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),
}

impl AnalysisError {
    /// Short status line shown while streaming
    pub fn status_text(&self) -> &'static str {
        match self {
            AnalysisError::Transport(_) => "Network error",
            AnalysisError::ServerStatus { .. } => "Server error",
            AnalysisError::ServerPayload(_) | AnalysisError::Empty => "Invalid response",
            AnalysisError::InvalidUpload(_) => "Invalid upload",
        }
    }

    /// Whether the failure happened before reaching the service
    pub fn is_transport(&self) -> bool {
        matches!(self, AnalysisError::Transport(_))
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Terminal session failures
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Stopped after {0} consecutive failed frames")]
    TooManyFailures(u32),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
