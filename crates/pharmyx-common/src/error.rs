use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PharmyxError {
    #[error("Data format error: {0}")]
    DataFormat(String),

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Dimension mismatch: expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Insufficient data: need at least {required} samples, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Model not fitted: {0}")]
    ModelNotFitted(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Training job not found: {0}")]
    JobNotFound(Uuid),

    #[error("No data available: {0}")]
    NoDataAvailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<toml::de::Error> for PharmyxError {
    fn from(e: toml::de::Error) -> Self {
        PharmyxError::Config(e.to_string())
    }
}

impl From<serde_yaml::Error> for PharmyxError {
    fn from(e: serde_yaml::Error) -> Self {
        PharmyxError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PharmyxError>;
