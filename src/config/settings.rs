//! Runner settings
//!
//! Knobs that control how a run is supervised, separate from the
//! parameters handed to the executable. Stored as TOML:
//!
//! ```toml
//! timeout_ms = 600000
//! release_grace_ms = 100
//! truthy_token = "T"
//! fifo_dir = "/dev/shm"
//! ```

use crate::error::{CambError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for the settings directory
pub const APP_ID: &str = "camb-pipes";

/// Settings filename inside the config directory
pub const SETTINGS_FILE: &str = "settings.toml";

/// Default grace period for readers after the process exits, in milliseconds
pub const DEFAULT_RELEASE_GRACE_MS: u64 = 100;

/// Default polling cadence, in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5;

/// Default token marking a switch as on
pub const DEFAULT_TRUTHY_TOKEN: &str = "T";

/// How a run is supervised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Overall deadline for one run; `None` waits forever
    pub timeout_ms: Option<u64>,

    /// How long readers may keep going after the process exits before
    /// the orchestrator unblocks them itself
    pub release_grace_ms: u64,

    /// Process wait and release retry cadence
    pub poll_interval_ms: u64,

    /// Value that turns an output switch on
    pub truthy_token: String,

    /// Parent directory for per-run pipe directories (system temp if unset)
    pub fifo_dir: Option<PathBuf>,

    /// Capture the executable's stderr instead of inheriting it
    pub capture_stderr: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            release_grace_ms: DEFAULT_RELEASE_GRACE_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            truthy_token: DEFAULT_TRUTHY_TOKEN.to_string(),
            fifo_dir: None,
            capture_stderr: true,
        }
    }
}

impl RunnerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the overall deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set the pipe parent directory
    pub fn with_fifo_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fifo_dir = Some(dir.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn release_grace(&self) -> Duration {
        Duration::from_millis(self.release_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CambError::Config(format!("Failed to read settings {:?}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            CambError::Config(format!("Failed to parse settings {:?}: {}", path, e))
        })
    }

    /// Load settings from the platform config directory, falling back to defaults
    pub fn load_or_default() -> Self {
        let Some(path) = settings_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save settings as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CambError::Config(format!("Failed to create settings directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| CambError::Config(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            CambError::Config(format!("Failed to write settings {:?}: {}", path, e))
        })
    }
}

/// Path of the settings file in the platform config directory
pub fn settings_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(SETTINGS_FILE))
}
