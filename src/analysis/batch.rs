//! Batch mode: upload one video, keep the processed result for playback

use std::sync::Arc;

use tracing::{error, info};

use super::playback::{MediaRegistry, PlaybackHandle, PlaybackSlot};
use super::types::{Exercise, VideoUpload};
use super::VisionService;
use crate::error::AnalysisError;

pub const STATUS_UPLOADING: &str = "Uploading…";

/// Owner of the batch screen's state and its single playback handle
pub struct BatchSession {
    service: Arc<dyn VisionService>,
    registry: MediaRegistry,
    slot: PlaybackSlot,
    exercise: Exercise,
    status: String,
}

impl BatchSession {
    pub fn new(service: Arc<dyn VisionService>, registry: MediaRegistry) -> Self {
        Self {
            service,
            registry,
            slot: PlaybackSlot::new(),
            exercise: Exercise::default(),
            status: String::new(),
        }
    }

    pub fn exercise(&self) -> Exercise {
        self.exercise
    }

    pub fn set_exercise(&mut self, exercise: Exercise) {
        self.exercise = exercise;
    }

    /// Current user-visible status line; empty when idle
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn playback(&self) -> Option<&PlaybackHandle> {
        self.slot.current()
    }

    /// Upload a video and replace the held playback handle with the result.
    ///
    /// On failure the previous handle stays available and the status carries
    /// the error; calling again retries.
    pub async fn upload(&mut self, upload: VideoUpload) -> Result<&PlaybackHandle, AnalysisError> {
        self.status = STATUS_UPLOADING.to_string();
        info!(file = %upload.file_name, exercise = %self.exercise, "Uploading video");

        match self.service.analyze_video(upload, self.exercise).await {
            Ok(video) => {
                info!(bytes = video.len(), "Processed video received");
                self.status.clear();
                // Revoke before registering so one handle is live at a time
                self.slot.clear();
                let handle = self.registry.create(video);
                Ok(self.slot.replace(handle))
            }
            Err(err) => {
                error!("Video analysis failed: {}", err);
                self.status = format!("Error: {err}");
                Err(err)
            }
        }
    }
}

impl Drop for BatchSession {
    fn drop(&mut self) {
        self.slot.clear();
    }
}
