//! pharmyx-models — Lightweight model catalog for drug-response prediction.
//!
//! Per-omics random forests, the late-fusion model, the untrained baseline,
//! grouped cross-validation and the shared model registry.

pub mod tree;
pub mod forest;
pub mod weights;
pub mod fusion;
pub mod baseline;
pub mod catalog;
pub mod cv;
pub mod registry;

pub use baseline::BaselineModel;
pub use catalog::{create_model, Model};
pub use cv::{cross_validate, grouped_kfold, mean_absolute_error, CvReport};
pub use forest::OmicsForest;
pub use fusion::{FusionModel, FusionOutput, OmicsPrediction};
pub use registry::{ModelKey, ModelRegistry, TrainedModel};
pub use weights::FusionWeights;
