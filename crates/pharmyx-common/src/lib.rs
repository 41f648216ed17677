//! pharmyx-common — Shared types, errors, and configuration used across all Pharmyx crates.

pub mod error;
pub mod types;
pub mod table;
pub mod entities;
pub mod confidence;
pub mod config;

// Re-export commonly used types
pub use error::{PharmyxError, Result};
pub use types::{DataType, ImputePolicy, ModelKind, Orientation};
pub use table::{is_padding_label, OmicsTable, RawTable, PAD_PREFIX};
pub use entities::{
    AssociationMethod, Biomarker, DatabaseStats, ModelSource, OmicsContribution, Patient,
    PredictionResult, ProcessingMetadata, ProcessingStep, StoredTable,
};
pub use config::{
    BiomarkerConfig, FusionConfig, ModelConfig, PlatformConfig, ProcessingConfig, StorageConfig,
    TrainingConfig,
};
