//! Per-type fusion weights.

use serde::{Deserialize, Serialize};

use pharmyx_common::{DataType, FusionConfig};

/// Reliability weight of each predictive omics type.
/// Weights sum to 1.0 once normalised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub genomics: f64,
    pub transcriptomics: f64,
    pub proteomics: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            genomics:        0.40,
            transcriptomics: 0.35,
            proteomics:      0.25,
        }
    }
}

impl From<&FusionConfig> for FusionWeights {
    fn from(config: &FusionConfig) -> Self {
        let mut w = Self {
            genomics: config.genomics_weight,
            transcriptomics: config.transcriptomics_weight,
            proteomics: config.proteomics_weight,
        };
        w.normalise();
        w
    }
}

impl FusionWeights {
    /// Weights from per-type mean absolute error: w ∝ 1 / (MAE + eps).
    /// Types without a score keep their share of `prior`.
    pub fn from_mae(scores: &[(DataType, f64)], prior: &FusionWeights) -> Self {
        let mut w = prior.clone();
        let scored: Vec<(DataType, f64)> = scores
            .iter()
            .filter(|(dt, mae)| dt.is_predictive() && mae.is_finite() && *mae >= 0.0)
            .copied()
            .collect();
        if scored.is_empty() {
            return w;
        }

        // Scored types share the prior mass they held, split by inverse error
        let scored_mass: f64 = scored.iter().map(|(dt, _)| prior.get(*dt)).sum();
        let inverse: Vec<f64> = scored.iter().map(|(_, mae)| 1.0 / (mae + 1e-6)).collect();
        let inverse_total: f64 = inverse.iter().sum();
        let mass = if scored_mass > 0.0 { scored_mass } else { 1.0 };
        for ((dt, _), inv) in scored.iter().zip(&inverse) {
            w.set(*dt, mass * inv / inverse_total);
        }
        w.normalise();
        w
    }

    pub fn get(&self, data_type: DataType) -> f64 {
        match data_type {
            DataType::Genomics        => self.genomics,
            DataType::Transcriptomics => self.transcriptomics,
            DataType::Proteomics      => self.proteomics,
            DataType::DrugResponse    => 0.0,
        }
    }

    fn set(&mut self, data_type: DataType, value: f64) {
        match data_type {
            DataType::Genomics        => self.genomics = value,
            DataType::Transcriptomics => self.transcriptomics = value,
            DataType::Proteomics      => self.proteomics = value,
            DataType::DrugResponse    => {}
        }
    }

    /// Validate that all weights sum to ~1.0
    pub fn validate(&self) -> bool {
        let sum: f64 = self.as_array().iter().sum();
        self.as_array().iter().all(|w| *w >= 0.0) && (sum - 1.0).abs() < 1e-6
    }

    /// Renormalise weights so they sum to 1.0
    pub fn normalise(&mut self) {
        let sum: f64 = self.as_array().iter().sum();
        if sum > 0.0 {
            self.genomics        /= sum;
            self.transcriptomics /= sum;
            self.proteomics      /= sum;
        }
    }

    /// Weights for the given types, renormalised over just those types.
    /// Falls back to equal shares when all of them are zero.
    pub fn renormalised_over(&self, types: &[DataType]) -> Vec<f64> {
        let raw: Vec<f64> = types.iter().map(|dt| self.get(*dt).max(0.0)).collect();
        let total: f64 = raw.iter().sum();
        if total > 0.0 {
            raw.iter().map(|w| w / total).collect()
        } else if types.is_empty() {
            vec![]
        } else {
            vec![1.0 / types.len() as f64; types.len()]
        }
    }

    /// Convert to array in `DataType::PREDICTIVE` order.
    pub fn as_array(&self) -> [f64; 3] {
        [self.genomics, self.transcriptomics, self.proteomics]
    }
}
