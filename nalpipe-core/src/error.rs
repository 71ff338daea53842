//! Error types shared by the pipeline.
//!
//! Most of the pipeline degrades silently (unsupported types return `None`,
//! incomplete data stays buffered). These errors cover what is left: config
//! loading, engine construction and engine-level decode failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Failed to read {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Decoder init failed ({backend}): {reason}")]
    EngineInit { backend: String, reason: String },
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Stream channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
