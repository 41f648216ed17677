//! Core entity types shared by the processing, storage and engine crates.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DataType, ModelKind};

// ---------------------------------------------------------------------------
// Processing metadata
// ---------------------------------------------------------------------------

/// One named transformation applied during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ProcessingStep {
    TransposeToSampleMajor,
    CoerceNumeric,
    ImputeMedian,
    ImputeZero,
    ClipDosage,
    Log2Transform,
    Winsorize,
    VarianceFilter,
    ZscoreScale,
    ReconcileWidth { width: usize },
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStep::TransposeToSampleMajor => f.write_str("transpose_to_sample_major"),
            ProcessingStep::CoerceNumeric          => f.write_str("coerce_numeric"),
            ProcessingStep::ImputeMedian           => f.write_str("impute_median"),
            ProcessingStep::ImputeZero             => f.write_str("impute_zero"),
            ProcessingStep::ClipDosage             => f.write_str("clip_dosage"),
            ProcessingStep::Log2Transform          => f.write_str("log2_transform"),
            ProcessingStep::Winsorize              => f.write_str("winsorize"),
            ProcessingStep::VarianceFilter         => f.write_str("variance_filter"),
            ProcessingStep::ZscoreScale            => f.write_str("zscore_scale"),
            ProcessingStep::ReconcileWidth { width } => write!(f, "reconcile_width({width})"),
        }
    }
}

/// Record of a single (patient, data type) processing event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub processing_type: DataType,
    pub processing_steps: Vec<ProcessingStep>,
    pub input_shape: (usize, usize),
    pub output_shape: (usize, usize),
    /// Features removed by the variance filter or truncated by reconciliation.
    pub dropped_features: usize,
    pub padded_features: usize,
    /// SHA-256 of the raw table, hex encoded.
    pub input_digest: String,
    pub timestamp: DateTime<Utc>,
}

impl ProcessingMetadata {
    /// Equality on everything but the timestamp.
    pub fn same_processing(&self, other: &ProcessingMetadata) -> bool {
        self.processing_type == other.processing_type
            && self.processing_steps == other.processing_steps
            && self.input_shape == other.input_shape
            && self.output_shape == other.output_shape
            && self.dropped_features == other.dropped_features
            && self.padded_features == other.padded_features
            && self.input_digest == other.input_digest
    }

    pub fn step_names(&self) -> Vec<String> {
        self.processing_steps.iter().map(|s| s.to_string()).collect()
    }
}

// ---------------------------------------------------------------------------
// Patient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTable {
    pub location: String,
    pub shape: (usize, usize),
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: String,
    /// Demographics such as age and gender.
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub omics: BTreeMap<DataType, StoredTable>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn new(patient_id: impl Into<String>, attributes: BTreeMap<String, serde_json::Value>) -> Self {
        let now = Utc::now();
        Self {
            patient_id: patient_id.into(),
            attributes,
            omics: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has(&self, data_type: DataType) -> bool {
        self.omics.contains_key(&data_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub total_patients: usize,
    pub total_tables: usize,
    pub tables_by_type: BTreeMap<DataType, usize>,
}

// ---------------------------------------------------------------------------
// Biomarkers
// ---------------------------------------------------------------------------

/// How an association score was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationMethod {
    /// |Spearman rho| between feature values and drug response.
    Correlation,
    /// Normalized feature importance of the trained per-omics model.
    ModelImportance,
    /// Mean absolute z-score, used when no response labels or model exist.
    Magnitude,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Biomarker {
    pub feature_identifier: String,
    pub data_type: DataType,
    pub association_score: f64,
    pub method: AssociationMethod,
    /// 1-based position in the ranked list.
    pub rank: usize,
}

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

/// Where a per-omics prediction came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSource {
    Trained { version: u64 },
    /// Deterministic drug-signature projection used before any training.
    Baseline,
}

impl ModelSource {
    pub fn is_baseline(&self) -> bool {
        matches!(self, ModelSource::Baseline)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmicsContribution {
    pub data_type: DataType,
    pub prediction: f64,
    /// Standard deviation of the per-sample predictions.
    pub sample_spread: f64,
    /// Fusion weight after renormalization over the available types.
    pub weight: f64,
    pub source: ModelSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub patient_id: String,
    pub drug_id: String,
    pub model_type: ModelKind,
    pub predicted_response: f64,
    pub confidence_score: f64,
    pub contributions: Vec<OmicsContribution>,
    pub biomarkers: Vec<Biomarker>,
    pub generated_at: DateTime<Utc>,
}

impl PredictionResult {
    pub fn data_types_used(&self) -> Vec<DataType> {
        self.contributions.iter().map(|c| c.data_type).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_names_are_verbatim() {
        let steps = [
            ProcessingStep::TransposeToSampleMajor,
            ProcessingStep::ImputeZero,
            ProcessingStep::ReconcileWidth { width: 64 },
        ];
        let names: Vec<String> = steps.iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["transpose_to_sample_major", "impute_zero", "reconcile_width(64)"]);
    }

    #[test]
    fn test_same_processing_ignores_timestamp() {
        let a = ProcessingMetadata {
            processing_type: DataType::Proteomics,
            processing_steps: vec![ProcessingStep::CoerceNumeric],
            input_shape: (3, 8),
            output_shape: (3, 48),
            dropped_features: 0,
            padded_features: 40,
            input_digest: "abc".to_string(),
            timestamp: Utc::now(),
        };
        let mut b = a.clone();
        b.timestamp = a.timestamp + chrono::Duration::seconds(5);
        assert!(a.same_processing(&b));
        b.padded_features = 39;
        assert!(!a.same_processing(&b));
    }

    #[test]
    fn test_patient_tracks_tables() {
        let mut p = Patient::new("TEST_001", BTreeMap::new());
        assert!(!p.has(DataType::Genomics));
        p.omics.insert(DataType::Genomics, StoredTable {
            location: "mem://TEST_001/genomics".to_string(),
            shape: (10, 64),
            updated_at: Utc::now(),
        });
        assert!(p.has(DataType::Genomics));
    }
}
