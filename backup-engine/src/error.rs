//! Error taxonomy for the backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("archive operation failed during {step}: {detail:#}")]
    Archive {
        step: &'static str,
        detail: anyhow::Error,
    },

    #[error("integrity check failed for backup {id}: {reason}")]
    Integrity { id: String, reason: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation cancelled during {0}")]
    Cancelled(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn archive(step: &'static str, detail: impl Into<anyhow::Error>) -> Self {
        EngineError::Archive {
            step,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
