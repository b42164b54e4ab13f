//! Controller and playback configuration.
//!
//! Loaded from a camelCase JSON file; every field has a default so a file
//! only needs the values that differ (usually just `uuid`).
//!
//! ```json
//! { "baseUrl": "https://bibliob.us/api", "uuid": "YmlidXMtMDAwMi0wMzA5Mg==", "stripCapacity": 32 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scripting::ScriptOptions;

/// Environment variable consulted for the device identifier.
pub const UUID_ENV: &str = "STRIPCAST_UUID";

fn default_base_url() -> String {
    "https://bibliob.us/api".to_string()
}

/// LEDs per physical strip.
fn default_strip_capacity() -> u32 {
    32
}

fn default_row() -> u32 {
    1
}

fn default_full_run_poll_ms() -> u64 {
    10
}

fn default_step_poll_ms() -> u64 {
    5
}

fn default_max_operations() -> u64 {
    500_000
}

fn default_preview_waits() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StripcastConfig {
    /// Controller API base URL, without trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Device identifier used for token requests and as the `uuid` query parameter.
    #[serde(default)]
    pub uuid: Option<String>,

    /// LEDs per strip; must match the hardware. Indices wrap modulo this.
    #[serde(default = "default_strip_capacity")]
    pub strip_capacity: u32,

    /// Row `addLed` writes to before any `changeStripLed`.
    #[serde(default = "default_row")]
    pub default_row: u32,

    /// Poll interval while a full run is recording.
    #[serde(default = "default_full_run_poll_ms")]
    pub full_run_poll_ms: u64,

    /// Poll interval in step ("explain") mode.
    #[serde(default = "default_step_poll_ms")]
    pub step_poll_ms: u64,

    /// Rhai operation budget per run.
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    /// Whether the recording pass waits out `waitForSeconds` in real time.
    #[serde(default = "default_preview_waits")]
    pub preview_waits: bool,
}

impl Default for StripcastConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            uuid: None,
            strip_capacity: default_strip_capacity(),
            default_row: default_row(),
            full_run_poll_ms: default_full_run_poll_ms(),
            step_poll_ms: default_step_poll_ms(),
            max_operations: default_max_operations(),
            preview_waits: default_preview_waits(),
        }
    }
}

impl StripcastConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.strip_capacity == 0 {
            return Err(ConfigError::Invalid("stripCapacity must be at least 1".to_string()));
        }
        if self.full_run_poll_ms == 0 || self.step_poll_ms == 0 {
            return Err(ConfigError::Invalid("poll intervals must be positive".to_string()));
        }
        if self.step_poll_ms >= self.full_run_poll_ms {
            return Err(ConfigError::Invalid(
                "stepPollMs must be shorter than fullRunPollMs".to_string(),
            ));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!("baseUrl '{}' is not an http(s) URL", self.base_url)));
        }
        if matches!(&self.uuid, Some(uuid) if uuid.trim().is_empty()) {
            return Err(ConfigError::Invalid("uuid cannot be empty".to_string()));
        }
        Ok(())
    }

    /// The device identifier, required for anything that talks to the controller.
    pub fn require_uuid(&self) -> Result<&str, ConfigError> {
        self.uuid
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid(format!("no device uuid configured (set uuid or {})", UUID_ENV)))
    }

    pub fn full_run_poll(&self) -> Duration {
        Duration::from_millis(self.full_run_poll_ms)
    }

    pub fn step_poll(&self) -> Duration {
        Duration::from_millis(self.step_poll_ms)
    }

    pub fn script_options(&self) -> ScriptOptions {
        ScriptOptions {
            max_operations: self.max_operations,
            honor_waits: self.preview_waits,
        }
    }
}
