pub mod overlay;
pub mod surface;
#[cfg(feature = "preview")]
pub mod window;

pub use overlay::{OverlayRenderer, OverlayStyle, RenderSummary};
pub use surface::{ChannelSurface, DrawSurface, ImageSurface};
#[cfg(feature = "preview")]
pub use window::Sdl2Display;
