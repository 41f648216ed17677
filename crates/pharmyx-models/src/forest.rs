//! Random-forest regressor for a single omics type.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use pharmyx_common::{DataType, ModelConfig, OmicsTable, PharmyxError, Result};

use crate::tree::{RegressionTree, TreeParams};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmicsForest {
    data_type: DataType,
    config: ModelConfig,
    trees: Vec<RegressionTree>,
    n_features: Option<usize>,
    importances: Vec<f64>,
}

impl OmicsForest {
    pub fn new(data_type: DataType, config: ModelConfig) -> Self {
        Self {
            data_type,
            config,
            trees: Vec::new(),
            n_features: None,
            importances: Vec::new(),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn n_features(&self) -> Option<usize> {
        self.n_features
    }

    /// Normalized variance reduction per feature column. Empty before fitting.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn fit(&mut self, x: &OmicsTable, y: &[f64]) -> Result<()> {
        self.data_type.require_predictive()?;
        let (n, width) = x.shape();
        if n < 2 {
            return Err(PharmyxError::InsufficientData { required: 2, actual: n });
        }
        if y.len() != n {
            return Err(PharmyxError::DimensionMismatch { expected: n, actual: y.len() });
        }
        if let Some(expected) = self.n_features {
            if expected != width {
                return Err(PharmyxError::DimensionMismatch { expected, actual: width });
            }
        }
        if width == 0 {
            return Err(PharmyxError::DataFormat("table has no feature columns".to_string()));
        }
        if !x.all_finite() || y.iter().any(|v| !v.is_finite()) {
            return Err(PharmyxError::DataFormat(format!(
                "{} training data contains non-finite values",
                self.data_type
            )));
        }
        self.config.validate()?;

        let fraction = self.config.max_features_for(self.data_type);
        let params = TreeParams {
            max_depth: self.config.max_depth,
            min_samples_split: self.config.min_samples_split,
            min_samples_leaf: self.config.min_samples_leaf,
            max_features: ((width as f64 * fraction).ceil() as usize).clamp(1, width),
        };

        let mut importances = vec![0.0; width];
        let trees: Vec<RegressionTree> = (0..self.config.n_estimators)
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(self.config.random_state.wrapping_add(t as u64));
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(x, y, bootstrap, params, &mut rng, &mut importances)
            })
            .collect();

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for v in &mut importances {
                *v /= total;
            }
        }

        debug!(
            data_type = %self.data_type,
            samples = n,
            features = width,
            trees = trees.len(),
            "Fitted omics forest"
        );

        self.trees = trees;
        self.importances = importances;
        self.n_features = Some(width);
        Ok(())
    }

    pub fn predict(&self, x: &OmicsTable) -> Result<Vec<f64>> {
        let Some(expected) = self.n_features.filter(|_| self.is_fitted()) else {
            return Err(PharmyxError::ModelNotFitted(format!("{} forest", self.data_type)));
        };
        if x.n_cols() != expected {
            return Err(PharmyxError::DimensionMismatch { expected, actual: x.n_cols() });
        }
        let n_trees = self.trees.len() as f64;
        Ok(x
            .rows()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / n_trees)
            .collect())
    }
}
