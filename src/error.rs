//! Crate-wide error type
//!
//! One enum covers both pipelines. Library code propagates these with `?`;
//! the CLI boundary maps them to exit codes.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for afinar operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while fine-tuning or running inference
#[derive(Debug, Error)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid configuration (bad hyperparameters, unsupported combination)
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Dataset file missing
    #[error("dataset file not found: {path}")]
    DatasetNotFound { path: PathBuf },

    /// Malformed dataset record
    #[error("malformed record {index} in {path}: {reason}")]
    MalformedRecord {
        path: PathBuf,
        index: usize,
        reason: String,
    },

    /// Tokenizer loading or encoding failure
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Model loading or forward-pass failure
    #[error("model error: {0}")]
    Model(String),

    /// Model registry (hub) resolution failure
    #[error("failed to fetch {file} from {repo}: {message}")]
    Hub {
        repo: String,
        file: String,
        message: String,
    },

    /// Resource exhaustion (out of memory, allocation failure)
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// Error propagated from the tensor framework
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl Error {
    /// Build a tokenizer error from any displayable source
    pub fn tokenizer(e: impl std::fmt::Display) -> Self {
        Self::Tokenizer(e.to_string())
    }

    /// Build a model error from any displayable source
    pub fn model(e: impl std::fmt::Display) -> Self {
        Self::Model(e.to_string())
    }
}
