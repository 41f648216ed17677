//! Biomarker discovery.
//!
//! Evidence is gathered per feature label across the target population and
//! scored with the strongest method the data supports: rank correlation
//! against drug response, then trained-model importance, then plain
//! magnitude. All predictive types share one ranked list.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, instrument};

use pharmyx_common::{
    is_padding_label, AssociationMethod, Biomarker, BiomarkerConfig, DataType, PharmyxError, Result,
};
use pharmyx_db::OmicsStore;
use pharmyx_models::{ModelKey, ModelRegistry, TrainedModel};
use pharmyx_processing::stats;

use crate::dataset;

/// Which patients discovery runs over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryTarget {
    /// Every patient in the store.
    Cohort,
    Patients(Vec<String>),
    Patient(String),
}

/// Everything known about one feature label of one data type.
#[derive(Debug, Default)]
struct FeatureEvidence {
    /// Column position where the label was first seen.
    position: usize,
    /// Mean value per patient.
    patient_means: BTreeMap<String, f64>,
    abs_sum: f64,
    observations: usize,
}

pub struct BiomarkerEngine {
    store: Arc<dyn OmicsStore>,
    registry: Arc<ModelRegistry>,
    config: BiomarkerConfig,
}

impl BiomarkerEngine {
    pub fn new(store: Arc<dyn OmicsStore>, registry: Arc<ModelRegistry>, config: BiomarkerConfig) -> Self {
        Self { store, registry, config }
    }

    pub async fn discover(&self, target: &DiscoveryTarget, drug_id: Option<&str>) -> Result<Vec<Biomarker>> {
        self.discover_with_limit(target, drug_id, self.config.top_n).await
    }

    /// Ranked biomarkers, truncated to `limit`.
    #[instrument(skip(self))]
    pub async fn discover_with_limit(
        &self,
        target: &DiscoveryTarget,
        drug_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Biomarker>> {
        let patients = self.resolve(target).await?;
        let labels = dataset::patient_labels(self.store.as_ref(), &patients, drug_id).await?;
        let models = self.registry.snapshot().await;

        let mut candidates = Vec::new();
        let mut tables_seen = 0usize;
        for data_type in DataType::PREDICTIVE {
            let (evidence, tables) = self.gather(&patients, data_type).await?;
            tables_seen += tables;
            if evidence.is_empty() {
                continue;
            }
            let model = trained_for(&models, data_type, drug_id);
            candidates.extend(self.score(data_type, &evidence, &labels, model.as_deref()));
        }

        if tables_seen == 0 {
            return Err(PharmyxError::NoDataAvailable(format!(
                "no processed omics tables for {} patient(s)",
                patients.len()
            )));
        }

        candidates.sort_by(|a, b| {
            b.association_score
                .partial_cmp(&a.association_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.feature_identifier.cmp(&b.feature_identifier))
                .then_with(|| a.data_type.cmp(&b.data_type))
        });
        candidates.truncate(limit);
        for (i, biomarker) in candidates.iter_mut().enumerate() {
            biomarker.rank = i + 1;
        }

        debug!(found = candidates.len(), patients = patients.len(), "Biomarker discovery finished");
        Ok(candidates)
    }

    async fn resolve(&self, target: &DiscoveryTarget) -> Result<Vec<String>> {
        let mut patients = match target {
            DiscoveryTarget::Cohort => self.store.list_patients().await?,
            DiscoveryTarget::Patients(ids) => ids.clone(),
            DiscoveryTarget::Patient(id) => vec![id.clone()],
        };
        patients.sort();
        patients.dedup();
        Ok(patients)
    }

    /// Per-feature evidence for one type, plus how many tables contributed.
    async fn gather(
        &self,
        patients: &[String],
        data_type: DataType,
    ) -> Result<(BTreeMap<String, FeatureEvidence>, usize)> {
        let mut evidence: BTreeMap<String, FeatureEvidence> = BTreeMap::new();
        let mut tables = 0usize;
        let loads = patients
            .iter()
            .map(|patient_id| self.store.load_processed_data(patient_id, data_type));
        let loaded = try_join_all(loads).await?;

        for (patient_id, table) in patients.iter().zip(loaded) {
            let Some(table) = table else {
                continue;
            };
            if table.n_rows() == 0 {
                continue;
            }
            tables += 1;
            for (col, label) in table.col_labels().iter().enumerate() {
                if is_padding_label(label) {
                    continue;
                }
                let values = table.column(col);
                let entry = evidence
                    .entry(label.clone())
                    .or_insert_with(|| FeatureEvidence { position: col, ..Default::default() });
                entry.patient_means.insert(patient_id.clone(), stats::mean(&values));
                entry.abs_sum += values.iter().map(|v| v.abs()).sum::<f64>();
                entry.observations += values.len();
            }
        }
        Ok((evidence, tables))
    }

    fn score(
        &self,
        data_type: DataType,
        evidence: &BTreeMap<String, FeatureEvidence>,
        labels: &BTreeMap<String, f64>,
        model: Option<&TrainedModel>,
    ) -> Vec<Biomarker> {
        let importances = model.and_then(|m| m.model.feature_importances());
        let mut scored = Vec::with_capacity(evidence.len());
        let mut magnitudes = Vec::new();

        for (feature, ev) in evidence {
            let (values, responses): (Vec<f64>, Vec<f64>) = ev
                .patient_means
                .iter()
                .filter_map(|(patient, value)| labels.get(patient).map(|label| (*value, *label)))
                .unzip();

            let (score, method) = if values.len() >= self.config.min_observations {
                let rho = stats::spearman(&values, &responses).unwrap_or(0.0);
                (rho.abs(), AssociationMethod::Correlation)
            } else if let Some(importances) = importances {
                let importance = importances.get(ev.position).copied().unwrap_or(0.0);
                (importance, AssociationMethod::ModelImportance)
            } else {
                let magnitude = ev.abs_sum / ev.observations.max(1) as f64;
                magnitudes.push(magnitude);
                (magnitude, AssociationMethod::Magnitude)
            };

            scored.push(Biomarker {
                feature_identifier: feature.clone(),
                data_type,
                association_score: score,
                method,
                rank: 0,
            });
        }

        // Magnitudes are only comparable within a type, so squash them to [0, 1]
        if !magnitudes.is_empty() {
            let min = magnitudes.iter().copied().fold(f64::INFINITY, f64::min);
            let max = magnitudes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            for b in scored.iter_mut().filter(|b| b.method == AssociationMethod::Magnitude) {
                b.association_score = stats::minmax_normalise(b.association_score, min, max);
            }
        }
        scored
    }
}

/// The trained per-omics model for `data_type` that serves `drug_id`, if any.
fn trained_for(
    models: &HashMap<ModelKey, Arc<TrainedModel>>,
    data_type: DataType,
    drug_id: Option<&str>,
) -> Option<Arc<TrainedModel>> {
    let keys = [ModelKey::per_omics(data_type).ok(), ModelKey::fusion_member(data_type).ok()];
    keys.into_iter()
        .flatten()
        .filter_map(|key| models.get(&key))
        .find(|m| match drug_id {
            Some(drug) => m.applies_to(drug),
            None       => m.drug_id.is_none(),
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmyx_common::{FusionConfig, ModelConfig, ModelKind, OmicsTable};
    use pharmyx_db::MemoryStore;
    use pharmyx_models::create_model;

    fn table(patient: usize) -> OmicsTable {
        let p = patient as f64;
        OmicsTable::from_rows(
            vec!["SAMPLE_000".into(), "SAMPLE_001".into()],
            vec!["GENE_A".into(), "GENE_B".into(), "__pad_0".into()],
            // GENE_A tracks the label, GENE_B is noise
            vec![vec![p, (patient % 2) as f64, 0.0], vec![p + 0.5, 1.0, 0.0]],
        )
        .unwrap()
    }

    fn response(ic50: f64) -> OmicsTable {
        OmicsTable::from_rows(vec!["erlotinib".into()], vec!["ic50".into()], vec![vec![ic50]]).unwrap()
    }

    async fn engine_with(patients: usize, labelled: bool) -> BiomarkerEngine {
        let store = Arc::new(MemoryStore::new());
        for p in 0..patients {
            let id = format!("P{p}");
            store.store_processed_data(&id, DataType::Transcriptomics, &table(p)).await.unwrap();
            if labelled {
                store.store_processed_data(&id, DataType::DrugResponse, &response(p as f64 * 2.0)).await.unwrap();
            }
        }
        BiomarkerEngine::new(store, Arc::new(ModelRegistry::new()), BiomarkerConfig::default())
    }

    #[tokio::test]
    async fn test_correlation_ranks_informative_feature_first() {
        let engine = engine_with(5, true).await;
        let found = engine.discover(&DiscoveryTarget::Cohort, Some("erlotinib")).await.unwrap();

        assert_eq!(found.len(), 2, "padding columns never become biomarkers");
        assert_eq!(found[0].feature_identifier, "GENE_A");
        assert_eq!(found[0].method, AssociationMethod::Correlation);
        assert!((found[0].association_score - 1.0).abs() < 1e-9);
        assert_eq!(found.iter().map(|b| b.rank).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_magnitude_when_unlabelled() {
        let engine = engine_with(3, false).await;
        let found = engine.discover(&DiscoveryTarget::Patient("P2".into()), None).await.unwrap();
        assert!(found.iter().all(|b| b.method == AssociationMethod::Magnitude));
        assert!(found.iter().all(|b| (0.0..=1.0).contains(&b.association_score)));
        assert_eq!(found[0].feature_identifier, "GENE_A");
    }

    #[tokio::test]
    async fn test_model_importance_for_small_targets() {
        let store = Arc::new(MemoryStore::new());
        store.store_processed_data("P0", DataType::Transcriptomics, &table(3)).await.unwrap();
        let registry = Arc::new(ModelRegistry::new());

        let x = OmicsTable::from_rows(
            (0..6).map(|i| format!("s{i}")).collect(),
            vec!["a".into(), "b".into(), "c".into()],
            (0..6).map(|i| vec![i as f64, 0.0, 0.0]).collect(),
        )
        .unwrap();
        let y: Vec<f64> = (0..6).map(|i| i as f64).collect();
        let mut model = create_model(
            ModelKind::Transcriptomics,
            &ModelConfig::default().with_n_estimators(5),
            &FusionConfig::default(),
        );
        model.fit(&x, &y).unwrap();
        let key = ModelKey::per_omics(DataType::Transcriptomics).unwrap();
        registry.install(key, model, None).await.unwrap();

        let engine = BiomarkerEngine::new(store, registry, BiomarkerConfig::default());
        let found = engine.discover(&DiscoveryTarget::Patient("P0".into()), None).await.unwrap();
        assert!(found.iter().all(|b| b.method == AssociationMethod::ModelImportance));
        assert_eq!(found[0].feature_identifier, "GENE_A");
    }

    #[tokio::test]
    async fn test_empty_target_has_no_data() {
        let engine = engine_with(0, false).await;
        assert!(matches!(
            engine.discover(&DiscoveryTarget::Cohort, None).await,
            Err(PharmyxError::NoDataAvailable(_))
        ));
        assert!(matches!(
            engine.discover(&DiscoveryTarget::Patients(vec!["ghost".into()]), None).await,
            Err(PharmyxError::NoDataAvailable(_))
        ));
    }

    #[tokio::test]
    async fn test_discovery_is_deterministic() {
        let engine = engine_with(6, true).await;
        let first = engine.discover(&DiscoveryTarget::Cohort, None).await.unwrap();
        let second = engine.discover(&DiscoveryTarget::Cohort, None).await.unwrap();
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0].association_score >= w[1].association_score));
    }
}
