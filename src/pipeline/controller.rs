//! Streaming session controller
//!
//! Drives the capture, transmit and render loop for one live session. The
//! overlay surface, state and status line live behind a single lock so a
//! response that arrives after `stop` can never reach the overlay.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use flume::Sender;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::state::SessionState;
use crate::analysis::{Exercise, FrameResult, VisionService};
use crate::capture::{
    CameraConstraints, CameraSession, CameraSource, Frame, FrameDimensions, FrameSampler,
};
use crate::display::{DrawSurface, OverlayRenderer};
use crate::error::{AnalysisError, SessionError};

pub const STATUS_REQUESTING: &str = "Requesting camera…";
pub const STATUS_STARTED: &str = "Camera started";
pub const STATUS_TRACKING: &str = "Tracking…";
pub const STATUS_FRAME_ERROR: &str = "Frame error";
pub const STATUS_STOPPED: &str = "Stopped";

pub const DEFAULT_REFRESH_HZ: u32 = 30;

/// Per-session parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub exercise: Exercise,
    /// Frames sent per second, at most one in flight
    pub refresh_hz: u32,
    pub jpeg_quality: u8,
    /// Fail the session after this many failed frames in a row; `None` retries forever
    pub max_consecutive_failures: Option<u32>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            exercise: Exercise::default(),
            refresh_hz: DEFAULT_REFRESH_HZ,
            jpeg_quality: crate::capture::sampler::DEFAULT_JPEG_QUALITY,
            max_consecutive_failures: None,
        }
    }
}

impl SessionSettings {
    pub fn cadence(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.refresh_hz.max(1)))
    }
}

struct Overlay {
    surface: Box<dyn DrawSurface>,
    state: SessionState,
    status: String,
}

struct Shared {
    overlay: Mutex<Overlay>,
    state_tx: watch::Sender<SessionState>,
    status_tx: watch::Sender<String>,
    exercise_tx: watch::Sender<Exercise>,
    camera: CameraSession,
    cancel: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Overlay> {
        self.overlay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, overlay: &mut Overlay, next: SessionState) -> bool {
        if !overlay.state.can_transition_to(&next) {
            debug!(from = %overlay.state, to = %next, "Ignoring state transition");
            return false;
        }
        overlay.state = next;
        self.state_tx.send_replace(next);
        true
    }

    fn set_status(&self, overlay: &mut Overlay, status: impl Into<String>) {
        let status = status.into();
        overlay.status.clone_from(&status);
        self.status_tx.send_replace(status);
    }

    fn set_exercise(&self, exercise: Exercise) {
        let previous = self.exercise_tx.send_replace(exercise);
        if previous != exercise {
            info!(from = %previous, to = %exercise, "Exercise changed");
        }
    }

    fn stop(&self) {
        let mut overlay = self.lock();
        self.cancel.cancel();
        self.camera.stop();
        if overlay.state.is_terminal() {
            return;
        }
        let ran_for = overlay.state.streaming_duration();
        self.transition(&mut overlay, SessionState::Stopped);
        self.set_status(&mut overlay, STATUS_STOPPED);
        info!(?ran_for, "Session stopped");
    }

    fn fail(&self, overlay: &mut Overlay, err: &SessionError) {
        self.cancel.cancel();
        self.camera.stop();
        if self.transition(overlay, SessionState::Failed) {
            error!("Session failed: {}", err);
            self.set_status(overlay, err.to_string());
        }
    }
}

enum Step {
    Continue,
    Stopped,
    Failed(SessionError),
}

/// Owns one streaming session from camera request to teardown
pub struct SessionController {
    shared: Arc<Shared>,
    service: Arc<dyn VisionService>,
    sampler: FrameSampler,
    renderer: OverlayRenderer,
    settings: SessionSettings,
    constraints: CameraConstraints,
    frame_tap: Option<Sender<Frame>>,
}

impl SessionController {
    pub fn new(
        source: Arc<dyn CameraSource>,
        service: Arc<dyn VisionService>,
        surface: Box<dyn DrawSurface>,
        settings: SessionSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (status_tx, _) = watch::channel(String::new());
        let (exercise_tx, _) = watch::channel(settings.exercise);
        Self {
            shared: Arc::new(Shared {
                overlay: Mutex::new(Overlay {
                    surface,
                    state: SessionState::Idle,
                    status: String::new(),
                }),
                state_tx,
                status_tx,
                exercise_tx,
                camera: CameraSession::new(source),
                cancel: CancellationToken::new(),
            }),
            service,
            sampler: FrameSampler::new(settings.jpeg_quality),
            renderer: OverlayRenderer::default(),
            settings,
            constraints: CameraConstraints::default(),
            frame_tap: None,
        }
    }

    pub fn with_constraints(mut self, constraints: CameraConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_renderer(mut self, renderer: OverlayRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Mirror every captured frame to `tap`; frames are dropped when it is full
    pub fn with_frame_tap(mut self, tap: Sender<Frame>) -> Self {
        self.frame_tap = Some(tap);
        self
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn status(&self) -> String {
        self.shared.lock().status.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Exercise sent with the next frame
    pub fn exercise(&self) -> Exercise {
        *self.shared.exercise_tx.borrow()
    }

    /// Switch exercise without restarting the camera
    pub fn set_exercise(&self, exercise: Exercise) {
        self.shared.set_exercise(exercise);
    }

    pub fn subscribe_status(&self) -> watch::Receiver<String> {
        self.shared.status_tx.subscribe()
    }

    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Request the camera and stream until stopped or failed.
    ///
    /// Returns `Ok` when the session was stopped and the error when it failed.
    #[instrument(skip(self), fields(exercise = %self.settings.exercise))]
    pub async fn run(&self) -> Result<(), SessionError> {
        {
            let mut overlay = self.shared.lock();
            match overlay.state {
                SessionState::Idle => {}
                SessionState::Stopped => return Ok(()),
                other => {
                    return Err(crate::error::CameraError::InvalidState(other.as_str()).into())
                }
            }
            self.shared
                .transition(&mut overlay, SessionState::RequestingCamera);
            self.shared.set_status(&mut overlay, STATUS_REQUESTING);
        }

        let feed = match self.shared.camera.start(&self.constraints).await {
            Ok(feed) => feed,
            Err(_) if self.shared.cancel.is_cancelled() => return Ok(()),
            Err(err) => {
                let err = SessionError::Camera(err);
                self.shared.fail(&mut self.shared.lock(), &err);
                return Err(err);
            }
        };

        {
            let mut overlay = self.shared.lock();
            let streaming = SessionState::Streaming {
                started_at: Instant::now(),
            };
            if !self.shared.transition(&mut overlay, streaming) {
                return Ok(());
            }
            self.shared.set_status(&mut overlay, STATUS_STARTED);
        }
        info!(cadence = ?self.settings.cadence(), "Streaming started");

        let cancel = self.shared.cancel.clone();
        let mut ticker = tokio::time::interval(self.settings.cadence());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = feed.read_frame() => frame,
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(_) if cancel.is_cancelled() => break,
                Err(err) => {
                    let err = SessionError::Camera(err);
                    self.shared.fail(&mut self.shared.lock(), &err);
                    return Err(err);
                }
            };

            if let Some(tap) = &self.frame_tap {
                let _ = tap.try_send(frame.clone());
            }

            let sampled = match self.sampler.capture(&frame, feed.dimensions()) {
                Ok(sampled) => sampled,
                Err(err) => {
                    warn!("Frame sampling failed: {}", err);
                    match self.record_failure(STATUS_FRAME_ERROR, &mut failures) {
                        Step::Continue => continue,
                        Step::Stopped => break,
                        Step::Failed(err) => return Err(err),
                    }
                }
            };
            let dimensions = sampled.dimensions;
            let exercise = *self.shared.exercise_tx.borrow();
            metrics::counter!("frames_sent").increment(1);

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Discarding in-flight frame after stop");
                    break;
                }
                outcome = self.service.analyze_frame(sampled, exercise) => outcome,
            };

            if *self.shared.exercise_tx.borrow() != exercise {
                debug!(%exercise, "Discarding result for previous exercise");
                continue;
            }

            match self.apply(outcome, dimensions, &mut failures) {
                Step::Continue => {}
                Step::Stopped => break,
                Step::Failed(err) => return Err(err),
            }
        }

        debug!("Streaming loop exited");
        Ok(())
    }

    fn apply(
        &self,
        outcome: Result<FrameResult, AnalysisError>,
        dimensions: FrameDimensions,
        failures: &mut u32,
    ) -> Step {
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                warn!("Frame analysis failed: {}", err);
                return self.record_failure(err.status_text(), failures);
            }
        };

        let mut overlay = self.shared.lock();
        if !overlay.state.is_streaming() {
            debug!("Dropping frame result after stop");
            return Step::Stopped;
        }
        *failures = 0;

        self.renderer.render(
            overlay.surface.as_mut(),
            &result,
            dimensions.width,
            dimensions.height,
        );
        let status = result.feedback_text().unwrap_or(STATUS_TRACKING).to_string();
        self.shared.set_status(&mut overlay, status);
        Step::Continue
    }

    fn record_failure(&self, status: &str, failures: &mut u32) -> Step {
        let mut overlay = self.shared.lock();
        if !overlay.state.is_streaming() {
            return Step::Stopped;
        }
        *failures += 1;
        metrics::counter!("frame_errors").increment(1);
        self.shared.set_status(&mut overlay, status);

        match self.settings.max_consecutive_failures {
            Some(limit) if *failures >= limit => {
                let err = SessionError::TooManyFailures(*failures);
                self.shared.fail(&mut overlay, &err);
                Step::Failed(err)
            }
            _ => Step::Continue,
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

/// Cloneable stop/inspect handle for a running [`SessionController`]
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn status(&self) -> String {
        self.shared.lock().status.clone()
    }

    pub fn is_released(&self) -> bool {
        self.shared.camera.is_released()
    }

    pub fn exercise(&self) -> Exercise {
        *self.shared.exercise_tx.borrow()
    }

    /// Switch exercise; the next frame is analyzed for it
    pub fn set_exercise(&self, exercise: Exercise) {
        self.shared.set_exercise(exercise);
    }
}
