use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrandError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for StrandError {
    fn from(err: serde_json::Error) -> Self {
        StrandError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StrandError>;

// Store failures (`Io`, `Store`) are transient from the daemon's point of view:
// shards retry them with the configured fetch backoff and never treat them as
// terminal. `Config` errors are raised synchronously from `start_all`.
