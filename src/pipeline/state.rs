//! Session state machine

use std::time::Instant;

/// Lifecycle of a streaming session
///
/// `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, camera not requested yet
    Idle,

    /// Waiting for the camera device
    RequestingCamera,

    /// Capture/transmit/render loop is running
    Streaming {
        /// When the camera became active
        started_at: Instant,
    },

    /// Stopped by the user or by teardown
    Stopped,

    /// Unrecoverable error; the status line carries the message
    Failed,
}

impl SessionState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        match (self, target) {
            (Idle, RequestingCamera) => true,
            (Idle, Stopped) => true,

            (RequestingCamera, Streaming { .. }) => true,
            (RequestingCamera, Stopped) => true,
            (RequestingCamera, Failed) => true,

            (Streaming { .. }, Stopped) => true,
            (Streaming { .. }, Failed) => true,

            (Stopped, _) | (Failed, _) => false,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::RequestingCamera => "requestingCamera",
            SessionState::Streaming { .. } => "streaming",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, SessionState::Streaming { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }

    pub fn streaming_duration(&self) -> Option<std::time::Duration> {
        if let SessionState::Streaming { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
