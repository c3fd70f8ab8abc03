pub mod controller;
pub mod state;

pub use controller::{SessionController, SessionHandle, SessionSettings};
pub use state::SessionState;
