//! The lightweight model catalog.

use serde::{Deserialize, Serialize};

use pharmyx_common::{DataType, FusionConfig, ModelConfig, ModelKind, OmicsTable, Result};

use crate::forest::OmicsForest;
use crate::fusion::FusionModel;

/// Every model the platform can train.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Model {
    PerOmics(OmicsForest),
    Fusion(FusionModel),
}

/// Build an unfitted model for `kind`. Forests take `models`, the fusion
/// model starts from the weights and confidence range in `fusion`.
pub fn create_model(kind: ModelKind, models: &ModelConfig, fusion: &FusionConfig) -> Model {
    match kind.data_type() {
        Some(data_type) => Model::PerOmics(OmicsForest::new(data_type, models.clone())),
        None            => Model::Fusion(FusionModel::from_config(fusion)),
    }
}

impl Model {
    /// Fails with `UnsupportedDataType` for a forest over a label table.
    pub fn kind(&self) -> Result<ModelKind> {
        match self {
            Model::PerOmics(forest) => ModelKind::for_data_type(forest.data_type()),
            Model::Fusion(_)        => Ok(ModelKind::MultiOmicsFusion),
        }
    }

    pub fn fit(&mut self, x: &OmicsTable, y: &[f64]) -> Result<()> {
        match self {
            Model::PerOmics(forest) => forest.fit(x, y),
            Model::Fusion(fusion)   => fusion.fit(x, y),
        }
    }

    pub fn predict(&self, x: &OmicsTable) -> Result<Vec<f64>> {
        match self {
            Model::PerOmics(forest) => forest.predict(x),
            Model::Fusion(fusion)   => fusion.predict(x),
        }
    }

    pub fn is_fitted(&self) -> bool {
        match self {
            Model::PerOmics(forest) => forest.is_fitted(),
            Model::Fusion(fusion)   => fusion.is_fitted(),
        }
    }

    /// Input width the model was fitted on.
    pub fn n_features(&self) -> Option<usize> {
        match self {
            Model::PerOmics(forest) => forest.n_features(),
            Model::Fusion(_)        => Some(DataType::PREDICTIVE.len()),
        }
    }

    pub fn feature_importances(&self) -> Option<&[f64]> {
        match self {
            Model::PerOmics(forest) if forest.is_fitted() => Some(forest.feature_importances()),
            _ => None,
        }
    }

    pub fn as_fusion(&self) -> Option<&FusionModel> {
        match self {
            Model::Fusion(fusion) => Some(fusion),
            Model::PerOmics(_)    => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmyx_common::PharmyxError;

    #[test]
    fn test_catalog_kinds() {
        let config = ModelConfig::default();
        for kind in [
            ModelKind::Genomics,
            ModelKind::Transcriptomics,
            ModelKind::Proteomics,
            ModelKind::MultiOmicsFusion,
        ] {
            let model = create_model(kind, &config, &FusionConfig::default());
            assert_eq!(model.kind().unwrap(), kind);
            assert!(!model.is_fitted());
        }
    }

    #[test]
    fn test_label_forest_has_no_kind() {
        let model = Model::PerOmics(OmicsForest::new(DataType::DrugResponse, ModelConfig::default()));
        assert!(matches!(model.kind(), Err(PharmyxError::UnsupportedDataType(_))));
    }

    #[test]
    fn test_fusion_model_uses_configured_weights() {
        let fusion = FusionConfig {
            genomics_weight: 0.1,
            transcriptomics_weight: 0.1,
            proteomics_weight: 0.8,
            confidence_floor: 0.2,
            confidence_ceiling: 0.6,
        };
        let model = create_model(ModelKind::MultiOmicsFusion, &ModelConfig::default(), &fusion);
        let built = model.as_fusion().unwrap();
        assert_eq!(built.weights(), FusionModel::from_config(&fusion).weights());
        assert!((built.weights().get(DataType::Proteomics) - 0.8).abs() < 1e-9);
        assert_ne!(built.weights(), FusionModel::default().weights());
        assert_eq!(built.confidence_range(), (0.2, 0.6));
    }

    #[test]
    fn test_unfitted_predict_fails() {
        let x = OmicsTable::new(vec!["s".into()], vec!["f".into()], vec![1.0]).unwrap();
        let model = create_model(ModelKind::Transcriptomics, &ModelConfig::default(), &FusionConfig::default());
        assert!(matches!(model.predict(&x), Err(PharmyxError::ModelNotFitted(_))));
        assert!(model.feature_importances().is_none());
    }

    #[test]
    fn test_per_omics_fit_through_enum() {
        let x = OmicsTable::from_rows(
            (0..4).map(|i| format!("s{i}")).collect(),
            vec!["a".into(), "b".into()],
            vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![2.0, 1.0], vec![3.0, 0.0]],
        )
        .unwrap();
        let mut model = create_model(
            ModelKind::Genomics,
            &ModelConfig::default().with_n_estimators(5),
            &FusionConfig::default(),
        );
        model.fit(&x, &[0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(model.predict(&x).unwrap().len(), 4);
        assert_eq!(model.n_features(), Some(2));
        assert_eq!(model.feature_importances().map(|i| i.len()), Some(2));
    }
}
