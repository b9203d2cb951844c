//! Engine configuration types.
//!
//! The top-level [`EngineConfig`] struct is deserialized from JSON and
//! carries the invocation defaults plus tool path overrides. Every section
//! defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

/// Root engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default maximum invocation time, in whole seconds. `0` disables the
    /// deadline entirely; individual invocations may override it.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Base directory for provisioned channel artifacts (unix FIFO dirs).
    /// When unset, the system temp dir is used.
    pub channel_dir: Option<PathBuf>,
    /// Tool path overrides.
    pub tools: ToolsConfig,
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            channel_dir: None,
            tools: ToolsConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Deserialize an `EngineConfig` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit (async, embedded, etc.).
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }
}

/// Custom paths for external tools. When a path is unset (or does not
/// exist), discovery falls back to searching `PATH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub magick_path: Option<PathBuf>,
    pub mkvmerge_path: Option<PathBuf>,
    pub pandoc_path: Option<PathBuf>,
}
