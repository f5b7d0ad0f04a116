//! Experiment-level errors.

use std::path::PathBuf;

use lampkit_config::ConfigError;
use lampkit_context::KSpecError;
use lampkit_core::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("Failed to load dataset {path}: {reason}")]
    Dataset { path: PathBuf, reason: String },

    #[error("Unknown task '{0}' (expected 1, 2, 3, 4, 5, 7 or amazon)")]
    UnknownTask(String),

    #[error("Unknown split '{0}' (expected dev, train or test)")]
    UnknownSplit(String),

    #[error("Checkpoint {path}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },

    #[error("Retrieval data {path}: {reason}")]
    Retrieval { path: PathBuf, reason: String },

    #[error("Invalid k specification: {0}")]
    KSpec(#[from] KSpecError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] lampkit_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExperimentError>;
