//! Background training jobs.
//!
//! Flow for one job:
//!   1. `submit` validates the request, records the job as `queued` and hands
//!      its id to the dispatcher over an unbounded channel
//!   2. The dispatcher waits for a worker permit and starts the job
//!   3. Each data type's training set is assembled from the store
//!   4. Cross-validation and the final fit run on the blocking pool
//!   5. Fitted models are installed in the registry
//!   6. The job ends `completed` with a report, or `failed` with a reason
//!
//! Job state lives in one `watch` channel per job, so readers always see a
//! whole `TrainingJob` and `wait_for` needs no polling. Lifecycle events are
//! also pushed on a broadcast channel for anyone who subscribes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use pharmyx_common::{
    DataType, FusionConfig, ModelConfig, ModelKind, PharmyxError, PlatformConfig, Result,
    TrainingConfig,
};
use pharmyx_db::OmicsStore;
use pharmyx_models::{
    create_model, cross_validate, mean_absolute_error, CvReport, FusionModel, FusionWeights, Model,
    ModelKey, ModelRegistry,
};

use crate::dataset::{self, TrainingSet};

// ── Job status ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Status only moves forward: queued → running → completed | failed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued    => "queued",
            JobStatus::Running   => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed    => "failed",
        };
        f.write_str(s)
    }
}

// ── Requests and reports ──────────────────────────────────────────────────────

/// Parameters for one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub model_type: ModelKind,
    /// Empty means every type the model kind can use.
    #[serde(default)]
    pub data_types: Vec<DataType>,
    /// Per-job overrides of the configured forest hyperparameters.
    #[serde(default)]
    pub hyperparameters: serde_json::Map<String, serde_json::Value>,
    /// `None` uses the configured default. Values of 0 or 1 disable CV.
    #[serde(default)]
    pub cv_folds: Option<usize>,
    /// Drug whose response is the label. `None` trains on the mean response.
    #[serde(default)]
    pub drug_id: Option<String>,
}

impl TrainingRequest {
    pub fn new(model_type: ModelKind) -> Self {
        Self {
            model_type,
            data_types: Vec::new(),
            hyperparameters: serde_json::Map::new(),
            cv_folds: None,
            drug_id: None,
        }
    }

    pub fn with_data_types(mut self, data_types: impl IntoIterator<Item = DataType>) -> Self {
        self.data_types = data_types.into_iter().collect();
        self
    }

    pub fn with_hyperparameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.hyperparameters.insert(key.into(), value.into());
        self
    }

    pub fn with_cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = Some(folds);
        self
    }

    pub fn with_drug(mut self, drug_id: impl Into<String>) -> Self {
        self.drug_id = Some(drug_id.into());
        self
    }

    /// The data types this request will train, in request order without duplicates.
    fn resolve_data_types(&self) -> Result<Vec<DataType>> {
        let mut resolved: Vec<DataType> = Vec::new();
        for dt in &self.data_types {
            let dt = dt.require_predictive()?;
            if !resolved.contains(&dt) {
                resolved.push(dt);
            }
        }

        match self.model_type.data_type() {
            Some(own) => {
                if resolved.iter().any(|dt| *dt != own) {
                    return Err(PharmyxError::UnsupportedDataType(format!(
                        "a {} model trains only on {}",
                        self.model_type, own
                    )));
                }
                Ok(vec![own])
            }
            None if resolved.is_empty() => Ok(DataType::PREDICTIVE.to_vec()),
            None => Ok(resolved),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeReport {
    pub data_type: DataType,
    pub n_samples: usize,
    pub n_patients: usize,
    /// `None` when CV was disabled or the data was too small for it.
    pub cv: Option<CvReport>,
    pub training_mae: f64,
    /// Registry version the fitted model was installed under.
    pub model_version: u64,
}

impl TypeReport {
    /// Error used for fusion weighting: held-out when available.
    pub fn weighting_mae(&self) -> f64 {
        self.cv.as_ref().map(|cv| cv.mean_mae).unwrap_or(self.training_mae)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedType {
    pub data_type: DataType,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub per_type: Vec<TypeReport>,
    /// Final weights of a fusion job.
    pub fusion_weights: Option<FusionWeights>,
    pub skipped: Vec<SkippedType>,
}

/// A training job as seen by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJob {
    pub job_id: Uuid,
    pub model_type: ModelKind,
    pub data_types: Vec<DataType>,
    pub hyperparameters: serde_json::Map<String, serde_json::Value>,
    /// Configured hyperparameters with the request overrides applied.
    pub model_config: ModelConfig,
    pub cv_folds: usize,
    pub drug_id: Option<String>,
    pub status: JobStatus,
    pub report: Option<TrainingReport>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Lifecycle events pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrainingEvent {
    Queued { job_id: Uuid, model_type: ModelKind },
    Started { job_id: Uuid },
    Completed { job_id: Uuid, models_installed: usize },
    Failed { job_id: Uuid, error: String },
}

impl TrainingEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            TrainingEvent::Queued { job_id, .. }
            | TrainingEvent::Started { job_id }
            | TrainingEvent::Completed { job_id, .. }
            | TrainingEvent::Failed { job_id, .. } => *job_id,
        }
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// Accepts training requests and runs them on a bounded worker pool.
pub struct TrainingJobManager {
    ctx: Arc<JobContext>,
    queue: mpsc::UnboundedSender<Uuid>,
}

struct JobContext {
    store: Arc<dyn OmicsStore>,
    registry: Arc<ModelRegistry>,
    model_config: ModelConfig,
    fusion_config: FusionConfig,
    training: TrainingConfig,
    jobs: RwLock<HashMap<Uuid, watch::Sender<TrainingJob>>>,
    events: broadcast::Sender<TrainingEvent>,
}

/// A fitted model waiting to be installed.
struct Fitted {
    model: Model,
    report: TypeReport,
}

impl fmt::Debug for TrainingJobManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let jobs = self.ctx.jobs.read().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("TrainingJobManager")
            .field("jobs", &jobs)
            .field("max_concurrent_jobs", &self.ctx.training.max_concurrent_jobs)
            .finish()
    }
}

impl TrainingJobManager {
    /// Start the dispatcher on the current Tokio runtime.
    pub fn new(
        store: Arc<dyn OmicsStore>,
        registry: Arc<ModelRegistry>,
        config: &PlatformConfig,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            PharmyxError::Config("training manager must be created inside a Tokio runtime".to_string())
        })?;

        let (events, _) = broadcast::channel(config.training.event_capacity.max(1));
        let (queue, rx) = mpsc::unbounded_channel::<Uuid>();
        let ctx = Arc::new(JobContext {
            store,
            registry,
            model_config: config.models.clone(),
            fusion_config: config.fusion.clone(),
            training: config.training.clone(),
            jobs: RwLock::new(HashMap::new()),
            events,
        });

        runtime.spawn(dispatch(Arc::clone(&ctx), rx));
        Ok(Self { ctx, queue })
    }

    /// Validate and enqueue a request. Returns as soon as the job is queued.
    pub fn submit(&self, request: TrainingRequest) -> Result<Uuid> {
        let data_types = request.resolve_data_types()?;
        let model_config = self.ctx.model_config.clone().with_overrides(&request.hyperparameters)?;
        let cv_folds = request.cv_folds.unwrap_or(self.ctx.training.default_cv_folds);
        let drug_id = request
            .drug_id
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let job = TrainingJob {
            job_id: Uuid::new_v4(),
            model_type: request.model_type,
            data_types,
            hyperparameters: request.hyperparameters,
            model_config,
            cv_folds,
            drug_id,
            status: JobStatus::Queued,
            report: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let job_id = job.job_id;
        let model_type = job.model_type;

        info!(
            job_id = %job_id,
            model_type = %model_type,
            data_types = ?job.data_types,
            cv_folds,
            "Queued training job"
        );
        let (tx, _) = watch::channel(job);
        self.ctx.jobs.write().unwrap_or_else(PoisonError::into_inner).insert(job_id, tx);

        // Announce before dispatch so subscribers see Queued ahead of Started
        let _ = self.ctx.events.send(TrainingEvent::Queued { job_id, model_type });
        if self.queue.send(job_id).is_err() {
            self.ctx.jobs.write().unwrap_or_else(PoisonError::into_inner).remove(&job_id);
            return Err(PharmyxError::Training("training dispatcher has stopped".to_string()));
        }
        Ok(job_id)
    }

    pub fn get_status(&self, job_id: Uuid) -> Result<TrainingJob> {
        self.ctx.snapshot(job_id)
    }

    /// Wait until the job is `completed` or `failed`.
    pub async fn wait_for(&self, job_id: Uuid) -> Result<TrainingJob> {
        let mut rx = self.ctx.watch(job_id)?;
        let job = rx
            .wait_for(|job| job.status.is_terminal())
            .await
            .map_err(|_| PharmyxError::Training(format!("state of job {job_id} is no longer tracked")))?;
        Ok(job.clone())
    }

    /// Every known job, oldest first.
    pub fn list_jobs(&self) -> Vec<TrainingJob> {
        let jobs = self.ctx.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<TrainingJob> = jobs.values().map(|tx| tx.borrow().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.job_id.cmp(&b.job_id)));
        all
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrainingEvent> {
        self.ctx.events.subscribe()
    }
}

/// Receives job ids and starts each one once a worker permit is free.
async fn dispatch(ctx: Arc<JobContext>, mut rx: mpsc::UnboundedReceiver<Uuid>) {
    let permits = Arc::new(Semaphore::new(ctx.training.max_concurrent_jobs.max(1)));
    info!(workers = ctx.training.max_concurrent_jobs.max(1), "Started training dispatcher");

    while let Some(job_id) = rx.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            ctx.run_job(job_id).await;
            drop(permit);
        });
    }
    debug!("Training dispatcher stopped");
}

impl JobContext {
    fn snapshot(&self, job_id: Uuid) -> Result<TrainingJob> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(&job_id)
            .map(|tx| tx.borrow().clone())
            .ok_or(PharmyxError::JobNotFound(job_id))
    }

    fn watch(&self, job_id: Uuid) -> Result<watch::Receiver<TrainingJob>> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(&job_id)
            .map(|tx| tx.subscribe())
            .ok_or(PharmyxError::JobNotFound(job_id))
    }

    /// Move a job to `next`. Returns false for unknown jobs and illegal moves.
    fn transition(&self, job_id: Uuid, next: JobStatus, apply: impl FnOnce(&mut TrainingJob)) -> bool {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = jobs.get(&job_id) else {
            return false;
        };
        tx.send_if_modified(|job| {
            if !job.status.can_transition_to(next) {
                warn!(job_id = %job_id, from = %job.status, to = %next, "Rejected job status transition");
                return false;
            }
            job.status = next;
            apply(job);
            true
        })
    }

    async fn run_job(self: Arc<Self>, job_id: Uuid) {
        let job = match self.snapshot(job_id) {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %job_id, "Dispatched job is missing: {}", e);
                return;
            }
        };
        if !self.transition(job_id, JobStatus::Running, |j| j.started_at = Some(Utc::now())) {
            return;
        }
        let _ = self.events.send(TrainingEvent::Started { job_id });
        info!(job_id = %job_id, model_type = %job.model_type, "Training job started");

        // Run in its own task so a panic surfaces as a JoinError, not a stuck job
        let ctx = Arc::clone(&self);
        let outcome = match tokio::spawn(async move { ctx.execute(job).await }).await {
            Ok(result) => result,
            Err(e) => Err(PharmyxError::Training(format!("training task aborted: {e}"))),
        };

        match outcome {
            Ok(report) => {
                let models_installed = report.per_type.len() + usize::from(report.fusion_weights.is_some());
                info!(
                    job_id = %job_id,
                    models_installed,
                    skipped = report.skipped.len(),
                    "Training job completed"
                );
                self.transition(job_id, JobStatus::Completed, |j| {
                    j.report = Some(report);
                    j.completed_at = Some(Utc::now());
                });
                let _ = self.events.send(TrainingEvent::Completed { job_id, models_installed });
            }
            Err(e) => {
                let reason = e.to_string();
                error!(job_id = %job_id, "Training job failed: {}", reason);
                self.transition(job_id, JobStatus::Failed, |j| {
                    j.error = Some(reason.clone());
                    j.completed_at = Some(Utc::now());
                });
                let _ = self.events.send(TrainingEvent::Failed { job_id, error: reason });
            }
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id, model_type = %job.model_type))]
    async fn execute(&self, job: TrainingJob) -> Result<TrainingReport> {
        match job.model_type.data_type() {
            Some(data_type) => {
                let Fitted { model, mut report } = self.fit_type(&job, data_type).await?;
                let key = ModelKey::per_omics(data_type)?;
                let installed = self.registry.install(key, model, job.drug_id.clone()).await?;
                report.model_version = installed.version;
                Ok(TrainingReport { per_type: vec![report], fusion_weights: None, skipped: Vec::new() })
            }
            None => self.execute_fusion(&job).await,
        }
    }

    /// Train every requested type, skip the ones that fail, then derive the
    /// fusion weights from per-type error.
    async fn execute_fusion(&self, job: &TrainingJob) -> Result<TrainingReport> {
        let mut fitted = Vec::new();
        let mut skipped = Vec::new();
        for &data_type in &job.data_types {
            match self.fit_type(job, data_type).await {
                Ok(f) => fitted.push(f),
                Err(e) => {
                    warn!(%data_type, "Skipping data type in fusion job: {}", e);
                    skipped.push(SkippedType { data_type, reason: e.to_string() });
                }
            }
        }

        if fitted.is_empty() {
            let reasons: Vec<String> = skipped
                .iter()
                .map(|s| format!("{}: {}", s.data_type, s.reason))
                .collect();
            return Err(PharmyxError::Training(format!(
                "no data type could be trained ({})",
                reasons.join("; ")
            )));
        }

        let scores: Vec<(DataType, f64)> = fitted
            .iter()
            .map(|f| (f.report.data_type, f.report.weighting_mae()))
            .collect();
        let weights = FusionWeights::from_mae(&scores, &FusionWeights::from(&self.fusion_config));

        let mut per_type = Vec::with_capacity(fitted.len());
        for Fitted { model, mut report } in fitted {
            let key = ModelKey::fusion_member(report.data_type)?;
            let installed = self.registry.install(key, model, job.drug_id.clone()).await?;
            report.model_version = installed.version;
            per_type.push(report);
        }

        let fusion = FusionModel::from_config(&self.fusion_config).with_weights(weights.clone());
        self.registry
            .install(ModelKey::fusion(), Model::Fusion(fusion), job.drug_id.clone())
            .await?;

        Ok(TrainingReport { per_type, fusion_weights: Some(weights), skipped })
    }

    async fn fit_type(&self, job: &TrainingJob, data_type: DataType) -> Result<Fitted> {
        let set = dataset::assemble(self.store.as_ref(), data_type, job.drug_id.as_deref()).await?;
        let kind = ModelKind::for_data_type(data_type)?;
        let config = job.model_config.clone();
        let fusion = self.fusion_config.clone();
        let cv_folds = job.cv_folds;

        tokio::task::spawn_blocking(move || fit_blocking(set, kind, &config, &fusion, cv_folds))
            .await
            .map_err(|e| PharmyxError::Training(format!("{data_type} fit aborted: {e}")))?
    }
}

/// CV followed by the final fit. CPU bound, runs on the blocking pool.
fn fit_blocking(
    set: TrainingSet,
    kind: ModelKind,
    config: &ModelConfig,
    fusion: &FusionConfig,
    cv_folds: usize,
) -> Result<Fitted> {
    let cv = if cv_folds > 1 {
        cross_validate(&set.x, &set.y, &set.groups, cv_folds, || create_model(kind, config, fusion))?
    } else {
        None
    };

    let mut model = create_model(kind, config, fusion);
    model.fit(&set.x, &set.y)?;
    let predicted = model.predict(&set.x)?;
    let training_mae = mean_absolute_error(&predicted, &set.y);

    debug!(
        data_type = %set.data_type,
        rows = set.x.n_rows(),
        training_mae,
        cv_mae = ?cv.as_ref().map(|c| c.mean_mae),
        "Fitted per-omics model"
    );

    Ok(Fitted {
        model,
        report: TypeReport {
            data_type: set.data_type,
            n_samples: set.x.n_rows(),
            n_patients: set.n_patients,
            cv,
            training_mae,
            model_version: 0,
        },
    })
}
