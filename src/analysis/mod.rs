//! Client side of the vision analysis service

pub mod batch;
pub mod client;
pub mod playback;
pub mod types;

use async_trait::async_trait;

use crate::capture::SampledFrame;
use crate::error::AnalysisError;

pub use batch::BatchSession;
pub use client::HttpAnalysisClient;
pub use playback::{MediaRegistry, PlaybackHandle, PlaybackSlot};
pub use types::{AnnotatedVideo, Exercise, FrameResult, Landmark, VideoUpload};

/// The two analysis operations the pipeline depends on
#[async_trait]
pub trait VisionService: Send + Sync {
    /// Analyze one sampled frame; the frame is consumed by the call
    async fn analyze_frame(
        &self,
        frame: SampledFrame,
        exercise: Exercise,
    ) -> Result<FrameResult, AnalysisError>;

    /// Upload a whole video and get the annotated version back
    async fn analyze_video(
        &self,
        upload: VideoUpload,
        exercise: Exercise,
    ) -> Result<AnnotatedVideo, AnalysisError>;
}
