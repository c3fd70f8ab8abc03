//! Camera session lifecycle
//!
//! A [`CameraSession`] wraps a [`CameraSource`] and guarantees that the
//! device is released exactly once, whether the session was stopped while
//! streaming, while the device was still being acquired, after a failure,
//! or simply dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::{Frame, FrameDimensions};
use crate::error::CameraError;

/// Requested capture parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConstraints {
    /// Device path; empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            device: String::new(),
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// Hardware seam for camera devices.
///
/// Implementations hold the device internally. `release` must close any
/// open device and make a later-completing `acquire` close what it opened.
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Open the device and start streaming
    async fn acquire(&self, constraints: &CameraConstraints) -> Result<(), CameraError>;

    /// Most recent frame from the live stream
    async fn read_frame(&self) -> Result<Frame, CameraError>;

    /// Native dimensions, once the device has reported them
    fn dimensions(&self) -> Option<FrameDimensions>;

    /// Close the device. Must be safe to call when nothing is open.
    fn release(&self);
}

/// Acquisition state of a camera session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Requesting,
    Active,
    Stopped,
    Failed,
}

impl AcquisitionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::Requesting => "requesting",
            AcquisitionState::Active => "active",
            AcquisitionState::Stopped => "stopped",
            AcquisitionState::Failed => "failed",
        }
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exclusive owner of one camera device
pub struct CameraSession {
    source: Arc<dyn CameraSource>,
    state: Mutex<AcquisitionState>,
    released: AtomicBool,
    cancel: CancellationToken,
}

impl CameraSession {
    pub fn new(source: Arc<dyn CameraSource>) -> Self {
        Self {
            source,
            state: Mutex::new(AcquisitionState::Idle),
            released: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> AcquisitionState {
        *self.lock_state()
    }

    /// Acquire the device. Loses any race against [`CameraSession::stop`].
    pub async fn start(&self, constraints: &CameraConstraints) -> Result<LiveFeed, CameraError> {
        {
            let mut state = self.lock_state();
            if *state != AcquisitionState::Idle {
                return Err(CameraError::InvalidState(state.as_str()));
            }
            *state = AcquisitionState::Requesting;
        }
        info!(device = %constraints.device, "Requesting camera");

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CameraError::Cancelled),
            result = self.source.acquire(constraints) => result,
        };

        let mut state = self.lock_state();
        match (result, *state) {
            (_, AcquisitionState::Stopped) => {
                debug!("Camera stopped during acquisition");
                Err(CameraError::Cancelled)
            }
            (Ok(()), _) => {
                *state = AcquisitionState::Active;
                info!(dimensions = ?self.source.dimensions(), "Camera active");
                Ok(LiveFeed {
                    source: self.source.clone(),
                    cancel: self.cancel.clone(),
                })
            }
            (Err(err), _) => {
                warn!("Camera acquisition failed: {}", err);
                *state = AcquisitionState::Failed;
                Err(err)
            }
        }
    }

    /// Release the device. Idempotent; the source sees exactly one release.
    pub fn stop(&self) {
        {
            let mut state = self.lock_state();
            if *state != AcquisitionState::Failed {
                *state = AcquisitionState::Stopped;
            }
        }
        self.cancel.cancel();
        if !self.released.swap(true, Ordering::AcqRel) {
            info!("Releasing camera");
            self.source.release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn lock_state(&self) -> MutexGuard<'_, AcquisitionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Live stream handed out by a successful [`CameraSession::start`]
#[derive(Clone)]
pub struct LiveFeed {
    source: Arc<dyn CameraSource>,
    cancel: CancellationToken,
}

impl LiveFeed {
    pub async fn read_frame(&self) -> Result<Frame, CameraError> {
        if self.cancel.is_cancelled() {
            return Err(CameraError::InvalidState("stopped"));
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CameraError::InvalidState("stopped")),
            frame = self.source.read_frame() => frame,
        }
    }

    pub fn dimensions(&self) -> Option<FrameDimensions> {
        self.source.dimensions()
    }

    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}
