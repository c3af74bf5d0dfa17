//! Error types for Carebridge Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Unknown error code: {0}")]
    UnknownErrorCode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
