//! Late fusion of per-omics predictions.
//!
//! Combination is a weighted average over the types that actually produced a
//! prediction, with weights renormalised over those types. Confidence follows
//! the banded policy in [`pharmyx_common::confidence`]: the number of
//! contributing types picks the band and their agreement picks the position
//! inside it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use pharmyx_common::confidence::{compute_confidence, weighted_spread, ConfidenceInputs};
use pharmyx_common::{
    DataType, FusionConfig, ModelSource, OmicsContribution, OmicsTable, PharmyxError, Result,
};

use crate::weights::FusionWeights;

/// Patient-level output of one per-omics model.
#[derive(Debug, Clone, PartialEq)]
pub struct OmicsPrediction {
    pub data_type: DataType,
    pub prediction: f64,
    /// Standard deviation of the per-sample predictions.
    pub sample_spread: f64,
    pub source: ModelSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutput {
    pub predicted_response: f64,
    pub confidence_score: f64,
    pub contributions: Vec<OmicsContribution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionModel {
    weights: FusionWeights,
    confidence_floor: f64,
    confidence_ceiling: f64,
    fitted: bool,
}

impl Default for FusionModel {
    fn default() -> Self {
        Self::from_config(&FusionConfig::default())
    }
}

impl FusionModel {
    pub fn from_config(config: &FusionConfig) -> Self {
        Self {
            weights: FusionWeights::from(config),
            confidence_floor: config.confidence_floor,
            confidence_ceiling: config.confidence_ceiling,
            fitted: false,
        }
    }

    pub fn weights(&self) -> &FusionWeights {
        &self.weights
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// `(floor, ceiling)` of the confidence score.
    pub fn confidence_range(&self) -> (f64, f64) {
        (self.confidence_floor, self.confidence_ceiling)
    }

    /// Install weights derived elsewhere (cross-validated error, for example).
    pub fn with_weights(mut self, mut weights: FusionWeights) -> Self {
        weights.normalise();
        self.weights = weights;
        self.fitted = true;
        self
    }

    /// Derive reliability weights from stacked per-type predictions.
    ///
    /// `x` has one column per predictive type in `DataType::PREDICTIVE`
    /// order; `NaN` marks a type with no prediction for that row.
    pub fn fit(&mut self, x: &OmicsTable, y: &[f64]) -> Result<()> {
        let (n, width) = x.shape();
        if n < 2 {
            return Err(PharmyxError::InsufficientData { required: 2, actual: n });
        }
        if y.len() != n {
            return Err(PharmyxError::DimensionMismatch { expected: n, actual: y.len() });
        }
        if width != DataType::PREDICTIVE.len() {
            return Err(PharmyxError::DimensionMismatch {
                expected: DataType::PREDICTIVE.len(),
                actual: width,
            });
        }
        if y.iter().any(|v| !v.is_finite()) || x.values().iter().any(|v| v.is_infinite()) {
            return Err(PharmyxError::DataFormat("fusion training data contains non-finite values".to_string()));
        }

        let mut scores = Vec::new();
        for (col, dt) in DataType::PREDICTIVE.iter().enumerate() {
            let errors: Vec<f64> = x
                .column(col)
                .iter()
                .zip(y)
                .filter(|(p, _)| !p.is_nan())
                .map(|(p, t)| (p - t).abs())
                .collect();
            if !errors.is_empty() {
                scores.push((*dt, errors.iter().sum::<f64>() / errors.len() as f64));
            }
        }
        if scores.is_empty() {
            return Err(PharmyxError::NoDataAvailable("no per-omics predictions to fuse".to_string()));
        }

        self.weights = FusionWeights::from_mae(&scores, &self.weights);
        self.fitted = true;
        debug!(weights = ?self.weights, "Fitted fusion weights");
        Ok(())
    }

    /// Row-wise fusion of stacked per-type predictions.
    pub fn predict(&self, x: &OmicsTable) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(PharmyxError::ModelNotFitted("multi_omics_fusion".to_string()));
        }
        if x.n_cols() != DataType::PREDICTIVE.len() {
            return Err(PharmyxError::DimensionMismatch {
                expected: DataType::PREDICTIVE.len(),
                actual: x.n_cols(),
            });
        }
        x.rows()
            .enumerate()
            .map(|(r, row)| {
                let available: Vec<(DataType, f64)> = DataType::PREDICTIVE
                    .iter()
                    .zip(row)
                    .filter(|(_, v)| !v.is_nan())
                    .map(|(dt, v)| (*dt, *v))
                    .collect();
                if available.is_empty() {
                    return Err(PharmyxError::NoDataAvailable(format!(
                        "row {} has no per-omics predictions",
                        x.row_labels()[r]
                    )));
                }
                let types: Vec<DataType> = available.iter().map(|(dt, _)| *dt).collect();
                let weights = self.weights.renormalised_over(&types);
                Ok(available.iter().zip(&weights).map(|((_, v), w)| v * w).sum())
            })
            .collect()
    }

    /// Fuse patient-level predictions into one response and a confidence.
    pub fn combine(&self, predictions: &[OmicsPrediction]) -> Result<FusionOutput> {
        let usable: Vec<&OmicsPrediction> = predictions
            .iter()
            .filter(|p| p.data_type.is_predictive() && p.prediction.is_finite())
            .collect();
        if usable.is_empty() {
            return Err(PharmyxError::NoDataAvailable(
                "no per-omics predictions to combine".to_string(),
            ));
        }

        let types: Vec<DataType> = usable.iter().map(|p| p.data_type).collect();
        let weights = self.weights.renormalised_over(&types);
        let values: Vec<f64> = usable.iter().map(|p| p.prediction).collect();
        let predicted_response: f64 = values.iter().zip(&weights).map(|(v, w)| v * w).sum();

        let spread = if usable.len() >= 2 {
            weighted_spread(&values, &weights)
        } else {
            usable[0].sample_spread.max(0.0)
        };
        let baseline_fraction =
            usable.iter().filter(|p| p.source.is_baseline()).count() as f64 / usable.len() as f64;

        let confidence_score = compute_confidence(
            &ConfidenceInputs {
                available_types: usable.len(),
                total_types: DataType::PREDICTIVE.len(),
                spread,
                baseline_fraction,
            },
            self.confidence_floor,
            self.confidence_ceiling,
        );

        let contributions = usable
            .iter()
            .zip(&weights)
            .map(|(p, w)| OmicsContribution {
                data_type: p.data_type,
                prediction: p.prediction,
                sample_spread: p.sample_spread,
                weight: *w,
                source: p.source.clone(),
            })
            .collect();

        Ok(FusionOutput { predicted_response, confidence_score, contributions })
    }
}
