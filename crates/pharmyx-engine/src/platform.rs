//! The platform facade: one handle that wires the store, the processing
//! pipeline, the model registry, training, prediction and discovery.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use pharmyx_common::{
    Biomarker, DataType, DatabaseStats, Patient, PlatformConfig, PredictionResult, Result,
};
use pharmyx_db::{Attributes, FsStore, MemoryStore, OmicsStore};
use pharmyx_models::ModelRegistry;
use pharmyx_processing::{ProcessingPipeline, UploadReceipt, UploadSource};

use crate::biomarkers::{BiomarkerEngine, DiscoveryTarget};
use crate::prediction::{PredictionRequest, PredictionService};
use crate::training::{TrainingEvent, TrainingJob, TrainingJobManager, TrainingRequest};

pub struct Platform {
    config: PlatformConfig,
    store: Arc<dyn OmicsStore>,
    pipeline: ProcessingPipeline,
    registry: Arc<ModelRegistry>,
    training: TrainingJobManager,
    biomarkers: Arc<BiomarkerEngine>,
    predictions: PredictionService,
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("registry", &self.registry)
            .field("training", &self.training)
            .finish_non_exhaustive()
    }
}

impl Platform {
    /// Build a platform over `store`. Must be called inside a Tokio runtime.
    pub fn new(config: PlatformConfig, store: Arc<dyn OmicsStore>) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(ModelRegistry::new());
        let training = TrainingJobManager::new(Arc::clone(&store), Arc::clone(&registry), &config)?;
        let biomarkers = Arc::new(BiomarkerEngine::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.biomarkers.clone(),
        ));
        let predictions = PredictionService::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&biomarkers),
            config.fusion.clone(),
            config.biomarkers.prediction_top_n,
        );

        Ok(Self {
            pipeline: ProcessingPipeline::new(config.processing.clone()),
            config,
            store,
            registry,
            training,
            biomarkers,
            predictions,
        })
    }

    pub fn in_memory(config: PlatformConfig) -> Result<Self> {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    /// Open the filesystem store named by `config.storage`.
    pub async fn open(config: PlatformConfig) -> Result<Self> {
        let store = FsStore::open_default(config.storage.data_dir.as_deref()).await?;
        info!(root = %store.root().display(), "Platform storage ready");
        Self::new(config, Arc::new(store))
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn OmicsStore> {
        &self.store
    }

    pub fn pipeline(&self) -> &ProcessingPipeline {
        &self.pipeline
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    // ── Data ──────────────────────────────────────────────────────────────────

    pub async fn upload(
        &self,
        source: impl Into<UploadSource>,
        data_type: DataType,
        patient_id: &str,
    ) -> Result<UploadReceipt> {
        self.pipeline
            .ingest(self.store.as_ref(), source.into(), data_type, patient_id)
            .await
    }

    pub async fn register_patient(&self, patient_id: &str, attributes: Attributes) -> Result<bool> {
        Ok(self.store.create_patient(patient_id, attributes).await?)
    }

    pub async fn patient(&self, patient_id: &str) -> Result<Option<Patient>> {
        Ok(self.store.get_patient(patient_id).await?)
    }

    pub async fn stats(&self) -> Result<DatabaseStats> {
        Ok(self.store.get_database_stats().await?)
    }

    // ── Training ──────────────────────────────────────────────────────────────

    pub fn submit_training(&self, request: TrainingRequest) -> Result<Uuid> {
        self.training.submit(request)
    }

    pub fn job_status(&self, job_id: Uuid) -> Result<TrainingJob> {
        self.training.get_status(job_id)
    }

    pub async fn wait_for_job(&self, job_id: Uuid) -> Result<TrainingJob> {
        self.training.wait_for(job_id).await
    }

    pub fn list_jobs(&self) -> Vec<TrainingJob> {
        self.training.list_jobs()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrainingEvent> {
        self.training.subscribe()
    }

    // ── Inference ─────────────────────────────────────────────────────────────

    pub async fn predict(&self, request: &PredictionRequest) -> Result<PredictionResult> {
        self.predictions.predict(request).await
    }

    pub async fn discover_biomarkers(
        &self,
        target: &DiscoveryTarget,
        drug_id: Option<&str>,
    ) -> Result<Vec<Biomarker>> {
        self.biomarkers.discover(target, drug_id).await
    }
}
