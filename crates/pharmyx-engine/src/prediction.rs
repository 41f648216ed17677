//! Drug-response prediction for a single patient.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use pharmyx_common::{
    DataType, FusionConfig, ModelKind, ModelSource, PharmyxError, PredictionResult, Result,
};
use pharmyx_db::OmicsStore;
use pharmyx_models::{BaselineModel, FusionModel, ModelKey, ModelRegistry, OmicsPrediction, TrainedModel};
use pharmyx_processing::stats;

use crate::biomarkers::{BiomarkerEngine, DiscoveryTarget};

fn default_model_type() -> ModelKind {
    ModelKind::MultiOmicsFusion
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub patient_id: String,
    pub drug_id: String,
    /// Empty means every predictive type the patient has.
    #[serde(default)]
    pub data_types: Vec<DataType>,
    #[serde(default = "default_model_type")]
    pub model_type: ModelKind,
}

impl PredictionRequest {
    pub fn new(patient_id: impl Into<String>, drug_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            drug_id: drug_id.into(),
            data_types: Vec::new(),
            model_type: default_model_type(),
        }
    }

    pub fn with_data_types(mut self, data_types: impl IntoIterator<Item = DataType>) -> Self {
        self.data_types = data_types.into_iter().collect();
        self
    }

    pub fn with_model_type(mut self, model_type: ModelKind) -> Self {
        self.model_type = model_type;
        self
    }

    fn resolve_data_types(&self) -> Result<Vec<DataType>> {
        for dt in &self.data_types {
            dt.require_predictive()?;
        }
        match self.model_type.data_type() {
            Some(own) if self.data_types.is_empty() || self.data_types.contains(&own) => Ok(vec![own]),
            Some(own) => Err(PharmyxError::UnsupportedDataType(format!(
                "a {} model predicts only from {}",
                self.model_type, own
            ))),
            None if self.data_types.is_empty() => Ok(DataType::PREDICTIVE.to_vec()),
            None => Ok(DataType::PREDICTIVE
                .into_iter()
                .filter(|dt| self.data_types.contains(dt))
                .collect()),
        }
    }
}

pub struct PredictionService {
    store: Arc<dyn OmicsStore>,
    registry: Arc<ModelRegistry>,
    biomarkers: Arc<BiomarkerEngine>,
    fusion_config: FusionConfig,
    biomarker_limit: usize,
}

impl PredictionService {
    pub fn new(
        store: Arc<dyn OmicsStore>,
        registry: Arc<ModelRegistry>,
        biomarkers: Arc<BiomarkerEngine>,
        fusion_config: FusionConfig,
        biomarker_limit: usize,
    ) -> Self {
        Self { store, registry, biomarkers, fusion_config, biomarker_limit }
    }

    #[instrument(skip(self, request), fields(patient_id = %request.patient_id, drug_id = %request.drug_id))]
    pub async fn predict(&self, request: &PredictionRequest) -> Result<PredictionResult> {
        let data_types = request.resolve_data_types()?;
        let drug_id = request.drug_id.trim();
        if drug_id.is_empty() {
            return Err(PharmyxError::DataFormat("drug_id must not be empty".to_string()));
        }

        // One snapshot for the whole request, so a concurrent install can't mix versions
        let models = self.registry.snapshot().await;

        let mut predictions = Vec::with_capacity(data_types.len());
        for data_type in data_types {
            let Some(table) = self.store.load_processed_data(&request.patient_id, data_type).await? else {
                continue;
            };
            if table.n_rows() == 0 {
                continue;
            }

            let (values, source) = match lookup(&models, request.model_type, data_type, drug_id) {
                Some(trained) => (
                    trained.model.predict(&table)?,
                    ModelSource::Trained { version: trained.version },
                ),
                None => (
                    BaselineModel::new(drug_id, data_type, table.n_cols()).predict(&table)?,
                    ModelSource::Baseline,
                ),
            };
            debug!(%data_type, samples = values.len(), ?source, "Per-omics prediction");

            predictions.push(OmicsPrediction {
                data_type,
                prediction: stats::mean(&values),
                sample_spread: stats::population_std(&values),
                source,
            });
        }

        if predictions.is_empty() {
            return Err(PharmyxError::NoDataAvailable(format!(
                "patient {} has no processed omics data for this request",
                request.patient_id
            )));
        }

        let fusion = self.fusion_model(&models, request.model_type, drug_id);
        let output = fusion.combine(&predictions)?;

        let used: Vec<DataType> = output.contributions.iter().map(|c| c.data_type).collect();
        let mut biomarkers = self
            .biomarkers
            .discover_with_limit(
                &DiscoveryTarget::Patient(request.patient_id.clone()),
                Some(drug_id),
                usize::MAX,
            )
            .await?;
        biomarkers.retain(|b| used.contains(&b.data_type));
        biomarkers.truncate(self.biomarker_limit);
        for (i, b) in biomarkers.iter_mut().enumerate() {
            b.rank = i + 1;
        }

        info!(
            predicted = output.predicted_response,
            confidence = output.confidence_score,
            types = used.len(),
            "Prediction complete"
        );

        Ok(PredictionResult {
            patient_id: request.patient_id.clone(),
            drug_id: drug_id.to_string(),
            model_type: request.model_type,
            predicted_response: output.predicted_response,
            confidence_score: output.confidence_score,
            contributions: output.contributions,
            biomarkers,
            generated_at: Utc::now(),
        })
    }

    /// Trained fusion weights for this drug, or the configured static ones.
    fn fusion_model(
        &self,
        models: &HashMap<ModelKey, Arc<TrainedModel>>,
        model_type: ModelKind,
        drug_id: &str,
    ) -> FusionModel {
        if !model_type.is_fusion() {
            return FusionModel::from_config(&self.fusion_config);
        }
        models
            .get(&ModelKey::fusion())
            .filter(|m| m.applies_to(drug_id))
            .and_then(|m| m.model.as_fusion().cloned())
            .unwrap_or_else(|| FusionModel::from_config(&self.fusion_config))
    }
}

/// Installed model to use for one type. Fusion requests prefer fusion
/// members, per-omics requests prefer standalone models.
fn lookup(
    models: &HashMap<ModelKey, Arc<TrainedModel>>,
    model_type: ModelKind,
    data_type: DataType,
    drug_id: &str,
) -> Option<Arc<TrainedModel>> {
    let per_omics = ModelKey::per_omics(data_type).ok();
    let member = ModelKey::fusion_member(data_type).ok();
    let order = if model_type.is_fusion() { [member, per_omics] } else { [per_omics, member] };
    order
        .into_iter()
        .flatten()
        .filter_map(|key| models.get(&key))
        .find(|m| m.applies_to(drug_id))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmyx_common::{BiomarkerConfig, ModelConfig, OmicsTable};
    use pharmyx_db::MemoryStore;
    use pharmyx_models::create_model;

    fn features(width: usize, offset: f64) -> OmicsTable {
        OmicsTable::from_rows(
            (0..3).map(|i| format!("SAMPLE_{i:03}")).collect(),
            (0..width).map(|c| format!("F{c}")).collect(),
            (0..3).map(|r| (0..width).map(|c| offset + (r * c) as f64 * 0.1).collect()).collect(),
        )
        .unwrap()
    }

    fn service(store: Arc<MemoryStore>, registry: Arc<ModelRegistry>) -> PredictionService {
        let store: Arc<dyn OmicsStore> = store;
        let engine = Arc::new(BiomarkerEngine::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            BiomarkerConfig::default(),
        ));
        PredictionService::new(store, registry, engine, FusionConfig::default(), 5)
    }

    #[test]
    fn test_request_resolution() {
        let all = PredictionRequest::new("P1", "erlotinib");
        assert_eq!(all.resolve_data_types().unwrap(), DataType::PREDICTIVE.to_vec());

        let label = PredictionRequest::new("P1", "erlotinib").with_data_types([DataType::DrugResponse]);
        assert!(matches!(label.resolve_data_types(), Err(PharmyxError::UnsupportedDataType(_))));

        let restricted = PredictionRequest::new("P1", "erlotinib")
            .with_model_type(ModelKind::Proteomics)
            .with_data_types([DataType::Genomics, DataType::Proteomics]);
        assert_eq!(restricted.resolve_data_types().unwrap(), vec![DataType::Proteomics]);
    }

    #[tokio::test]
    async fn test_baseline_prediction_without_training() {
        let store = Arc::new(MemoryStore::new());
        store.store_processed_data("P1", DataType::Genomics, &features(8, 0.0)).await.unwrap();
        let service = service(store, Arc::new(ModelRegistry::new()));

        let result = service.predict(&PredictionRequest::new("P1", "erlotinib")).await.unwrap();
        assert_eq!(result.data_types_used(), vec![DataType::Genomics]);
        assert!(result.contributions[0].source.is_baseline());
        assert!(result.predicted_response.is_finite());
        assert!((0.0..=1.0).contains(&result.confidence_score));
        assert!(result.biomarkers.len() <= 5);
        assert!(result.biomarkers.iter().all(|b| b.data_type == DataType::Genomics));
    }

    #[tokio::test]
    async fn test_trained_model_is_used_for_matching_drug() {
        let store = Arc::new(MemoryStore::new());
        store.store_processed_data("P1", DataType::Proteomics, &features(4, 1.0)).await.unwrap();
        let registry = Arc::new(ModelRegistry::new());

        let x = features(4, 0.0);
        let mut model = create_model(
            ModelKind::Proteomics,
            &ModelConfig::default().with_n_estimators(3),
            &FusionConfig::default(),
        );
        model.fit(&x, &[0.1, 0.2, 0.3]).unwrap();
        let key = ModelKey::per_omics(DataType::Proteomics).unwrap();
        let installed = registry.install(key, model, Some("erlotinib".into())).await.unwrap();
        let service = service(store, registry);

        let trained = service.predict(&PredictionRequest::new("P1", "Erlotinib")).await.unwrap();
        assert_eq!(trained.contributions[0].source, ModelSource::Trained { version: installed.version });

        let other = service.predict(&PredictionRequest::new("P1", "cisplatin")).await.unwrap();
        assert!(other.contributions[0].source.is_baseline());
    }

    #[tokio::test]
    async fn test_missing_patient_data() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store, Arc::new(ModelRegistry::new()));
        assert!(matches!(
            service.predict(&PredictionRequest::new("ghost", "erlotinib")).await,
            Err(PharmyxError::NoDataAvailable(_))
        ));
        assert!(matches!(
            service.predict(&PredictionRequest::new("ghost", "  ")).await,
            Err(PharmyxError::DataFormat(_))
        ));
    }
}
