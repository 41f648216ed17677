//! pharmyx-engine — Training, prediction and biomarker discovery over processed omics data.
//!
//! [`Platform`] is the entry point most callers want. The services it wires
//! together are exported for callers that bring their own store or registry.
//!
//! # Example
//!
//! ```rust,no_run
//! use pharmyx_common::{DataType, PlatformConfig};
//! use pharmyx_engine::{Platform, PredictionRequest};
//!
//! #[tokio::main]
//! async fn main() -> pharmyx_common::Result<()> {
//!     let platform = Platform::in_memory(PlatformConfig::default())?;
//!     let raw = platform.pipeline().create_sample_data(DataType::Genomics, 50, 10);
//!     platform.upload(raw, DataType::Genomics, "TEST_GEN_15").await?;
//!
//!     let request = PredictionRequest::new("TEST_GEN_15", "erlotinib")
//!         .with_data_types([DataType::Genomics]);
//!     let result = platform.predict(&request).await?;
//!     println!("{:.3} (confidence {:.2})", result.predicted_response, result.confidence_score);
//!     Ok(())
//! }
//! ```

pub mod dataset;
pub mod training;
pub mod prediction;
pub mod biomarkers;
pub mod platform;

pub use biomarkers::{BiomarkerEngine, DiscoveryTarget};
pub use dataset::{assemble, response_label, TrainingSet};
pub use platform::Platform;
pub use prediction::{PredictionRequest, PredictionService};
pub use training::{
    JobStatus, SkippedType, TrainingEvent, TrainingJob, TrainingJobManager, TrainingReport,
    TrainingRequest, TypeReport,
};
