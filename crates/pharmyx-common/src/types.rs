//! Closed catalogs of omics data types and model kinds.
//!
//! Every pipeline and model decision keys off these enums, so adding a new
//! omics type is a compile-checked change across the workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PharmyxError;

/// How a raw upload of a given data type is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// Rows are samples, columns are features.
    SampleMajor,
    /// Rows are features, columns are samples (VCF-derived genotype matrices).
    FeatureMajor,
}

/// Missing-value policy applied before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputePolicy {
    Median,
    Zero,
}

/// A category of biological measurement, or the drug-response label table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Genomics,
    Transcriptomics,
    Proteomics,
    DrugResponse,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::Genomics,
        DataType::Transcriptomics,
        DataType::Proteomics,
        DataType::DrugResponse,
    ];

    /// Types that feed predictive models. Drug response is the label source.
    pub const PREDICTIVE: [DataType; 3] = [
        DataType::Genomics,
        DataType::Transcriptomics,
        DataType::Proteomics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Genomics        => "genomics",
            DataType::Transcriptomics => "transcriptomics",
            DataType::Proteomics      => "proteomics",
            DataType::DrugResponse    => "drug_response",
        }
    }

    pub fn is_predictive(&self) -> bool {
        !matches!(self, DataType::DrugResponse)
    }

    /// Raw orientation of uploads. Genomics arrives feature-major.
    pub fn raw_orientation(&self) -> Orientation {
        match self {
            DataType::Genomics => Orientation::FeatureMajor,
            DataType::Transcriptomics | DataType::Proteomics | DataType::DrugResponse => {
                Orientation::SampleMajor
            }
        }
    }

    pub fn impute_policy(&self) -> ImputePolicy {
        match self {
            DataType::Genomics => ImputePolicy::Zero,
            DataType::Transcriptomics | DataType::Proteomics | DataType::DrugResponse => {
                ImputePolicy::Median
            }
        }
    }

    /// Fixed feature width every processed table of this type is reconciled to.
    pub fn default_feature_width(&self) -> usize {
        match self {
            DataType::Genomics        => 64,
            DataType::Transcriptomics => 128,
            DataType::Proteomics      => 48,
            DataType::DrugResponse    => 4,
        }
    }

    /// Reject label-only types where a predictive input is required.
    pub fn require_predictive(self) -> Result<Self, PharmyxError> {
        if self.is_predictive() {
            Ok(self)
        } else {
            Err(PharmyxError::UnsupportedDataType(format!(
                "{} is a label table and cannot be used as a model input",
                self
            )))
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = PharmyxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "genomics"                         => Ok(DataType::Genomics),
            "transcriptomics"                  => Ok(DataType::Transcriptomics),
            "proteomics"                       => Ok(DataType::Proteomics),
            "drug_response" | "drug-response"  => Ok(DataType::DrugResponse),
            other => Err(PharmyxError::UnsupportedDataType(other.to_string())),
        }
    }
}

/// Entries in the lightweight model catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Genomics,
    Transcriptomics,
    Proteomics,
    MultiOmicsFusion,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Genomics         => "genomics",
            ModelKind::Transcriptomics  => "transcriptomics",
            ModelKind::Proteomics       => "proteomics",
            ModelKind::MultiOmicsFusion => "multi_omics_fusion",
        }
    }

    /// The data type a per-omics model is trained on. `None` for fusion.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            ModelKind::Genomics         => Some(DataType::Genomics),
            ModelKind::Transcriptomics  => Some(DataType::Transcriptomics),
            ModelKind::Proteomics       => Some(DataType::Proteomics),
            ModelKind::MultiOmicsFusion => None,
        }
    }

    /// Per-omics model kind for a predictive data type.
    pub fn for_data_type(data_type: DataType) -> Result<Self, PharmyxError> {
        match data_type {
            DataType::Genomics        => Ok(ModelKind::Genomics),
            DataType::Transcriptomics => Ok(ModelKind::Transcriptomics),
            DataType::Proteomics      => Ok(ModelKind::Proteomics),
            DataType::DrugResponse    => Err(PharmyxError::UnsupportedDataType(
                "drug_response has no per-omics model".to_string(),
            )),
        }
    }

    pub fn is_fusion(&self) -> bool {
        matches!(self, ModelKind::MultiOmicsFusion)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = PharmyxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "genomics"                                => Ok(ModelKind::Genomics),
            "transcriptomics"                         => Ok(ModelKind::Transcriptomics),
            "proteomics"                              => Ok(ModelKind::Proteomics),
            "multi_omics_fusion" | "fusion"           => Ok(ModelKind::MultiOmicsFusion),
            other => Err(PharmyxError::UnsupportedDataType(format!("model type {other}"))),
        }
    }
}
