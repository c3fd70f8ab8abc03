pub mod camera;
pub mod decoder;
pub mod frame;
pub mod sampler;
#[cfg(feature = "v4l2-camera")]
pub mod v4l2;

pub use camera::{AcquisitionState, CameraConstraints, CameraSession, CameraSource, LiveFeed};
pub use frame::{Frame, FrameDimensions, FrameMetadata, PixelFormat, SampledFrame};
pub use sampler::FrameSampler;
#[cfg(feature = "v4l2-camera")]
pub use v4l2::V4l2Camera;
