pub mod analysis;
pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
#[cfg(feature = "v4l2-camera")]
pub mod utils;

use std::path::Path;

use arc_swap::ArcSwap;
use config::{Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::CameraConstraints;
use crate::display::OverlayStyle;
use crate::error::ConfigError;
use crate::pipeline::SessionSettings;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix of environment overrides, e.g. `POSECOACH_SERVICE__BASE_URL`
pub const ENV_PREFIX: &str = "POSECOACH";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CameraConstraints,
    pub service: ServiceConfig,
    pub session: SessionSettings,
    pub overlay: OverlayStyle,
}

/// Vision service endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    /// Per-frame request timeout; `None` waits for the transport
    pub frame_timeout_ms: Option<u64>,
    pub video_timeout_secs: Option<u64>,
    /// Largest video accepted for upload
    pub max_upload_bytes: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".into(),
            frame_timeout_ms: Some(5_000),
            video_timeout_secs: Some(300),
            max_upload_bytes: 200 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file at `path` (if any), then `POSECOACH_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            debug!("Loading config from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: Config = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.service.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "service.base_url must be an http(s) URL, got '{url}'"
            )));
        }
        if self.session.refresh_hz == 0 {
            return Err(ConfigError::Invalid("session.refresh_hz must be > 0".into()));
        }
        if !(1..=100).contains(&self.session.jpeg_quality) {
            return Err(ConfigError::Invalid(
                "session.jpeg_quality must be within 1..=100".into(),
            ));
        }
        if self.session.max_consecutive_failures == Some(0) {
            return Err(ConfigError::Invalid(
                "session.max_consecutive_failures must be > 0 when set".into(),
            ));
        }
        Ok(())
    }
}
