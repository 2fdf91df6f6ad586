use blockview_kernel::{ClockConfig, ClockError};
use blockview_stream::{ChannelConfig, ChannelError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors loading or validating a viewer configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("refresh rate must be positive, got {0}")]
    InvalidRefresh(f64),
}

/// Everything needed to stand up a viewer.
///
/// Missing fields in a config file take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub clock: ClockConfig,
    pub channel: ChannelConfig,
    /// Host callback rate used by the frame driver, in Hz.
    pub refresh_hz: f64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            channel: ChannelConfig::default(),
            refresh_hz: 60.0,
        }
    }
}

impl ViewerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clock.validate()?;
        self.channel.validate()?;
        if !(self.refresh_hz.is_finite() && self.refresh_hz > 0.0) {
            return Err(ConfigError::InvalidRefresh(self.refresh_hz));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json_str(&json)?;
        tracing::debug!(path = %path.display(), "viewer config loaded");
        Ok(config)
    }
}
