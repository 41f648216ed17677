//! pharmyx-processing — Turns raw omics uploads into fixed-width processed tables.

pub mod loader;
pub mod normalizer;
pub mod pipeline;
pub mod stats;

pub use normalizer::OmicsNormalizer;
pub use pipeline::{ProcessingPipeline, UploadReceipt, UploadSource};
