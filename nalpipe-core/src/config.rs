//! Pipeline configuration
//!
//! Loaded from JSON and/or the environment:
//!
//! ```json
//! { "decoder_resource_path": "/opt/openh264", "use_worker_thread": true }
//! ```
//!
//! | Variable                | Field                   |
//! |-------------------------|-------------------------|
//! | `NALPIPE_DECODER_PATH`  | `decoder_resource_path` |
//! | `NALPIPE_WORKER_THREAD` | `use_worker_thread`     |

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DECODER_PATH: &str = "NALPIPE_DECODER_PATH";
pub const ENV_WORKER_THREAD: &str = "NALPIPE_WORKER_THREAD";

/// Default depth of the chunk channel between transport and session.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Where decoder backends find their resources. Until this is set no
    /// media type is reported as supported.
    pub decoder_resource_path: Option<PathBuf>,
    /// Run the decoding engine on its own thread.
    pub use_worker_thread: bool,
    /// Chunks buffered between producer and session before the producer waits.
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decoder_resource_path: None,
            use_worker_thread: true,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PipelineError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `NALPIPE_*` environment variables on top of this config.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = lookup(ENV_DECODER_PATH).filter(|p| !p.trim().is_empty()) {
            self.decoder_resource_path = Some(PathBuf::from(path));
        }

        if let Some(value) = lookup(ENV_WORKER_THREAD) {
            self.use_worker_thread = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(PipelineError::Config(format!(
                        "{} must be a boolean, got {:?}",
                        ENV_WORKER_THREAD, other
                    )))
                }
            };
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(PipelineError::Config(
                "channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
