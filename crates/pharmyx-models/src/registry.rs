//! Registry of trained models.
//!
//! Models are shared as `Arc<TrainedModel>` and replaced atomically under the
//! write lock; readers clone the `Arc` and never observe a partial model.
//!
//! # Example
//!
//! ```rust,no_run
//! use pharmyx_common::{DataType, FusionConfig, ModelConfig, ModelKind};
//! use pharmyx_models::{create_model, ModelKey, ModelRegistry};
//!
//! # async fn run(x: pharmyx_common::OmicsTable, y: Vec<f64>) -> pharmyx_common::Result<()> {
//! let registry = ModelRegistry::new();
//! let mut model = create_model(ModelKind::Genomics, &ModelConfig::default(), &FusionConfig::default());
//! model.fit(&x, &y)?;
//! let key = ModelKey::per_omics(DataType::Genomics)?;
//! let installed = registry.install(key, model, Some("erlotinib".into())).await?;
//! println!("installed version {}", installed.version);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use pharmyx_common::{DataType, ModelKind, PharmyxError, Result};

use crate::catalog::Model;

/// `(kind, data type)`. Fusion jobs install one per-omics member per type
/// plus the fusion model itself under `data_type: None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub kind: ModelKind,
    pub data_type: Option<DataType>,
}

impl ModelKey {
    pub fn per_omics(data_type: DataType) -> Result<Self> {
        Ok(Self { kind: ModelKind::for_data_type(data_type)?, data_type: Some(data_type) })
    }

    pub fn fusion_member(data_type: DataType) -> Result<Self> {
        Ok(Self { kind: ModelKind::MultiOmicsFusion, data_type: Some(data_type.require_predictive()?) })
    }

    pub fn fusion() -> Self {
        Self { kind: ModelKind::MultiOmicsFusion, data_type: None }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data_type {
            Some(dt) => write!(f, "{}/{}", self.kind, dt),
            None     => write!(f, "{}", self.kind),
        }
    }
}

#[derive(Debug)]
pub struct TrainedModel {
    pub key: ModelKey,
    pub model: Model,
    pub n_features: usize,
    /// Drug the labels came from. `None` means the mean response over drugs.
    pub drug_id: Option<String>,
    pub version: u64,
    pub trained_at: DateTime<Utc>,
}

impl TrainedModel {
    /// Whether this model may serve predictions for `drug_id`.
    pub fn applies_to(&self, drug_id: &str) -> bool {
        match &self.drug_id {
            Some(trained) => trained.eq_ignore_ascii_case(drug_id.trim()),
            None          => true,
        }
    }
}

#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<ModelKey, Arc<TrainedModel>>>,
    versions: AtomicU64,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("versions", &self.versions.load(Ordering::Relaxed))
            .field("models", &"<trained models>")
            .finish()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fitted model, replacing any previous one under `key`.
    pub async fn install(
        &self,
        key: ModelKey,
        model: Model,
        drug_id: Option<String>,
    ) -> Result<Arc<TrainedModel>> {
        if !model.is_fitted() {
            return Err(PharmyxError::ModelNotFitted(format!("refusing to install {key}")));
        }
        let n_features = model
            .n_features()
            .ok_or_else(|| PharmyxError::ModelNotFitted(key.to_string()))?;

        let mut models = self.models.write().await;
        let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        let trained = Arc::new(TrainedModel {
            key,
            model,
            n_features,
            drug_id,
            version,
            trained_at: Utc::now(),
        });
        models.insert(key, Arc::clone(&trained));
        info!(model = %key, version, "Installed trained model");
        Ok(trained)
    }

    pub async fn get(&self, key: &ModelKey) -> Option<Arc<TrainedModel>> {
        self.models.read().await.get(key).cloned()
    }

    /// Point-in-time copy of every installed model.
    pub async fn snapshot(&self) -> HashMap<ModelKey, Arc<TrainedModel>> {
        self.models.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.models.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.models.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::create_model;
    use pharmyx_common::{FusionConfig, ModelConfig, OmicsTable};

    fn fitted(kind: ModelKind) -> Model {
        let x = OmicsTable::from_rows(
            (0..4).map(|i| format!("s{i}")).collect(),
            vec!["a".into(), "b".into()],
            vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![2.0, 1.0], vec![3.0, 0.0]],
        )
        .unwrap();
        let mut model = create_model(kind, &ModelConfig::default().with_n_estimators(3), &FusionConfig::default());
        model.fit(&x, &[0.0, 1.0, 2.0, 3.0]).unwrap();
        model
    }

    #[tokio::test]
    async fn test_install_swaps_and_versions() {
        let registry = ModelRegistry::new();
        let key = ModelKey::per_omics(DataType::Genomics).unwrap();

        let first = registry.install(key, fitted(ModelKind::Genomics), None).await.unwrap();
        let reader = registry.get(&key).await.unwrap();
        let second = registry
            .install(key, fitted(ModelKind::Genomics), Some("erlotinib".into()))
            .await
            .unwrap();

        assert!(second.version > first.version);
        // the old Arc stays valid for readers that grabbed it
        assert_eq!(reader.version, first.version);
        assert_eq!(registry.get(&key).await.unwrap().version, second.version);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unfitted_model_rejected() {
        let registry = ModelRegistry::new();
        let model = create_model(ModelKind::Proteomics, &ModelConfig::default(), &FusionConfig::default());
        let key = ModelKey::per_omics(DataType::Proteomics).unwrap();
        assert!(matches!(
            registry.install(key, model, None).await,
            Err(PharmyxError::ModelNotFitted(_))
        ));
        assert!(registry.is_empty().await);
    }

    #[test]
    fn test_keys() {
        assert!(ModelKey::per_omics(DataType::DrugResponse).is_err());
        assert!(ModelKey::fusion_member(DataType::DrugResponse).is_err());
        assert_eq!(ModelKey::fusion().to_string(), "multi_omics_fusion");
        assert_eq!(
            ModelKey::fusion_member(DataType::Proteomics).unwrap().to_string(),
            "multi_omics_fusion/proteomics"
        );
    }

    #[test]
    fn test_applies_to_drug() {
        let model = TrainedModel {
            key: ModelKey::fusion(),
            model: Model::Fusion(Default::default()),
            n_features: 3,
            drug_id: Some("Erlotinib".into()),
            version: 1,
            trained_at: Utc::now(),
        };
        assert!(model.applies_to("erlotinib"));
        assert!(!model.applies_to("cisplatin"));
    }
}
