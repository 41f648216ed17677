//! Storage error types.

use pharmyx_common::PharmyxError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Corrupt table {location}: {reason}")]
    Corrupt { location: String, reason: String },
}

impl From<DbError> for PharmyxError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Io(e) => PharmyxError::Io(e),
            other          => PharmyxError::Storage(other.to_string()),
        }
    }
}
