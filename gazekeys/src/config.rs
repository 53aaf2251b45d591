//! Configuration management.
//!
//! Every section has defaults, so an empty or partial TOML file is valid.
//! CLI flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::feed;
use crate::ipc::server::DEFAULT_RATE_LIMIT;
use crate::gaze::{SampleValidation, SurfaceInset, Viewport};
use crate::keyboard::{DwellConfig, LayoutPreset};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Dwell timing
    pub dwell: DwellConfig,
    /// Gaze feed subscription
    pub feed: FeedConfig,
    /// Presentation-shell socket
    pub ipc: IpcConfig,
    /// Initial viewport size
    pub viewport: Viewport,
    /// Border around the tracked surface
    pub inset: SurfaceInset,
    /// Startup layout
    pub layout: LayoutConfig,
    /// Event loop settings
    pub runtime: RuntimeConfig,
}

/// Gaze feed configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// WebSocket URL of the tracker
    pub url: String,
    /// Connect and handshake timeout (ms)
    pub connect_timeout_ms: u64,
    /// Longest accepted message; longer messages are discarded
    pub max_message_bytes: usize,
    /// Drop samples outside the unit square
    pub reject_out_of_range: bool,
    /// Report the feed stale after this long without a sample (ms)
    pub stale_after_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8001".to_string(),
            connect_timeout_ms: 2000,
            max_message_bytes: 4096,
            reject_out_of_range: true,
            stale_after_ms: 2000,
        }
    }
}

impl FeedConfig {
    pub fn validation(&self) -> SampleValidation {
        SampleValidation {
            reject_out_of_range: self.reject_out_of_range,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// IPC configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Socket path; `$XDG_RUNTIME_DIR/gazekeys.sock` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<PathBuf>,
    /// Log every IPC message
    pub trace: bool,
    /// Broadcast cursor events (about 10 per second while the tracker runs)
    pub broadcast_cursor: bool,
    /// Requests per second accepted from one client
    pub rate_limit: u32,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket: None,
            trace: false,
            broadcast_cursor: true,
            rate_limit: DEFAULT_RATE_LIMIT,
        }
    }
}

/// Layout configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Preset loaded at startup
    pub preset: LayoutPreset,
}

/// Event loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum time one dispatch blocks (ms)
    pub poll_interval_ms: u64,
    /// Period of the status log line (s, 0 = disabled)
    pub status_interval_s: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            status_interval_s: 60,
        }
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.dwell.validate()?;

        feed::parse_url(&self.feed.url)?;
        if !(1..=60_000).contains(&self.feed.connect_timeout_ms) {
            return Err(Error::Config(format!(
                "connect_timeout_ms must be in [1, 60000], got {}",
                self.feed.connect_timeout_ms
            )));
        }
        if !(16..=1024 * 1024).contains(&self.feed.max_message_bytes) {
            return Err(Error::Config(format!(
                "max_message_bytes must be in [16, 1048576], got {}",
                self.feed.max_message_bytes
            )));
        }
        if self.feed.stale_after_ms == 0 {
            return Err(Error::Config("stale_after_ms must be > 0".to_string()));
        }

        if !self.viewport.has_area() {
            return Err(Error::Config(format!(
                "viewport must be positive, got {}x{}",
                self.viewport.width, self.viewport.height
            )));
        }
        if !self.inset.is_valid() {
            return Err(Error::Config("inset values must be finite and non-negative".to_string()));
        }
        if !self.inset.fits(self.viewport) {
            return Err(Error::Config("inset leaves no surface inside the viewport".to_string()));
        }

        if self.ipc.rate_limit == 0 {
            return Err(Error::Config("ipc rate_limit must be > 0".to_string()));
        }

        if !(1..=1000).contains(&self.runtime.poll_interval_ms) {
            return Err(Error::Config(format!(
                "poll_interval_ms must be in [1, 1000], got {}",
                self.runtime.poll_interval_ms
            )));
        }
        Ok(())
    }

    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from default location, or defaults if there is no file
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("gazekeys").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("gazekeys.toml"))
    }

    /// Generate TOML representation
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}
