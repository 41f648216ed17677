//! Configuration loading for Pharmyx.
//! Reads pharmyx.toml from the current directory or the path in PHARMYX_CONFIG.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::PharmyxError;
use crate::types::DataType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub biomarkers: BiomarkerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

// ── Processing ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_genomics_width")]
    pub genomics_width: usize,
    #[serde(default = "default_transcriptomics_width")]
    pub transcriptomics_width: usize,
    #[serde(default = "default_proteomics_width")]
    pub proteomics_width: usize,
    #[serde(default = "default_drug_response_width")]
    pub drug_response_width: usize,
    /// Seed for synthetic sample data.
    #[serde(default = "default_sample_seed")]
    pub sample_seed: u64,
    /// Cell values treated as missing (compared case-insensitively).
    #[serde(default = "default_missing_tokens")]
    pub missing_tokens: Vec<String>,
    /// Proteomics winsorization radius in MADs.
    #[serde(default = "default_winsorize_mads")]
    pub winsorize_mads: f64,
}

fn default_genomics_width()        -> usize { DataType::Genomics.default_feature_width() }
fn default_transcriptomics_width() -> usize { DataType::Transcriptomics.default_feature_width() }
fn default_proteomics_width()      -> usize { DataType::Proteomics.default_feature_width() }
fn default_drug_response_width()   -> usize { DataType::DrugResponse.default_feature_width() }
fn default_sample_seed()           -> u64   { 42 }
fn default_winsorize_mads()        -> f64   { 5.0 }

fn default_missing_tokens() -> Vec<String> {
    ["", "na", "nan", "null", "none", "."]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            genomics_width: default_genomics_width(),
            transcriptomics_width: default_transcriptomics_width(),
            proteomics_width: default_proteomics_width(),
            drug_response_width: default_drug_response_width(),
            sample_seed: default_sample_seed(),
            missing_tokens: default_missing_tokens(),
            winsorize_mads: default_winsorize_mads(),
        }
    }
}

impl ProcessingConfig {
    /// Declared feature width D for a data type.
    pub fn feature_width(&self, data_type: DataType) -> usize {
        match data_type {
            DataType::Genomics        => self.genomics_width,
            DataType::Transcriptomics => self.transcriptomics_width,
            DataType::Proteomics      => self.proteomics_width,
            DataType::DrugResponse    => self.drug_response_width,
        }
    }

    pub fn is_missing(&self, cell: &str) -> bool {
        let cell = cell.trim();
        self.missing_tokens.iter().any(|t| t.eq_ignore_ascii_case(cell))
    }
}

// ── Models ────────────────────────────────────────────────────────────────────

/// Hyperparameters for the per-omics forest regressors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
    /// Fraction of features tried per split. `None` uses the per-type default.
    #[serde(default)]
    pub max_features: Option<f64>,
    #[serde(default = "default_random_state")]
    pub random_state: u64,
}

fn default_n_estimators()      -> usize { 100 }
fn default_max_depth()         -> usize { 10 }
fn default_min_samples_split() -> usize { 2 }
fn default_min_samples_leaf()  -> usize { 1 }
fn default_random_state()      -> u64   { 42 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            max_depth: default_max_depth(),
            min_samples_split: default_min_samples_split(),
            min_samples_leaf: default_min_samples_leaf(),
            max_features: None,
            random_state: default_random_state(),
        }
    }
}

impl ModelConfig {
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn with_max_features(mut self, fraction: f64) -> Self {
        self.max_features = Some(fraction);
        self
    }

    /// Feature fraction for a data type, honoring an explicit override.
    pub fn max_features_for(&self, data_type: DataType) -> f64 {
        self.max_features.unwrap_or(match data_type {
            DataType::Genomics | DataType::Transcriptomics => 0.33,
            DataType::Proteomics                           => 0.5,
            DataType::DrugResponse                         => 1.0,
        })
    }

    /// Apply per-job hyperparameters from a JSON object.
    ///
    /// Unknown keys are logged and ignored; known keys with the wrong type
    /// are a configuration error.
    pub fn with_overrides(
        mut self,
        overrides: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, PharmyxError> {
        for (key, value) in overrides {
            match key.as_str() {
                "n_estimators"      => self.n_estimators = as_usize(key, value)?,
                "max_depth"         => self.max_depth = as_usize(key, value)?,
                "min_samples_split" => self.min_samples_split = as_usize(key, value)?,
                "min_samples_leaf"  => self.min_samples_leaf = as_usize(key, value)?,
                "random_state"      => self.random_state = as_usize(key, value)? as u64,
                "max_features"      => {
                    let f = value.as_f64().ok_or_else(|| bad_value(key, value))?;
                    self.max_features = Some(f);
                }
                other => warn!(hyperparameter = other, "Ignoring unknown hyperparameter"),
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), PharmyxError> {
        if self.n_estimators == 0 {
            return Err(PharmyxError::Config("n_estimators must be at least 1".to_string()));
        }
        if self.max_depth == 0 {
            return Err(PharmyxError::Config("max_depth must be at least 1".to_string()));
        }
        if self.min_samples_split < 2 {
            return Err(PharmyxError::Config("min_samples_split must be at least 2".to_string()));
        }
        if self.min_samples_leaf == 0 {
            return Err(PharmyxError::Config("min_samples_leaf must be at least 1".to_string()));
        }
        if let Some(f) = self.max_features {
            if !(f > 0.0 && f <= 1.0) {
                return Err(PharmyxError::Config(format!("max_features must be in (0, 1], got {f}")));
            }
        }
        Ok(())
    }
}

fn as_usize(key: &str, value: &serde_json::Value) -> Result<usize, PharmyxError> {
    value
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| bad_value(key, value))
}

fn bad_value(key: &str, value: &serde_json::Value) -> PharmyxError {
    PharmyxError::Config(format!("invalid value for {key}: {value}"))
}

// ── Fusion ────────────────────────────────────────────────────────────────────

/// Static fusion weights and the confidence range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_genomics_weight")]
    pub genomics_weight: f64,
    #[serde(default = "default_transcriptomics_weight")]
    pub transcriptomics_weight: f64,
    #[serde(default = "default_proteomics_weight")]
    pub proteomics_weight: f64,
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    #[serde(default = "default_confidence_ceiling")]
    pub confidence_ceiling: f64,
}

fn default_genomics_weight()        -> f64 { 0.40 }
fn default_transcriptomics_weight() -> f64 { 0.35 }
fn default_proteomics_weight()      -> f64 { 0.25 }
fn default_confidence_floor()       -> f64 { 0.05 }
fn default_confidence_ceiling()     -> f64 { 0.95 }

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            genomics_weight: default_genomics_weight(),
            transcriptomics_weight: default_transcriptomics_weight(),
            proteomics_weight: default_proteomics_weight(),
            confidence_floor: default_confidence_floor(),
            confidence_ceiling: default_confidence_ceiling(),
        }
    }
}

// ── Training ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Worker pool size for concurrent training jobs.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_cv_folds")]
    pub default_cv_folds: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_concurrent_jobs() -> usize { 2 }
fn default_cv_folds()            -> usize { 5 }
fn default_event_capacity()      -> usize { 256 }

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            default_cv_folds: default_cv_folds(),
            event_capacity: default_event_capacity(),
        }
    }
}

// ── Biomarkers ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiomarkerConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Paired observations required before correlation is trusted.
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
    /// Biomarkers attached to each prediction.
    #[serde(default = "default_prediction_top_n")]
    pub prediction_top_n: usize,
}

fn default_top_n()            -> usize { 20 }
fn default_min_observations() -> usize { 3 }
fn default_prediction_top_n() -> usize { 5 }

impl Default for BiomarkerConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            min_observations: default_min_observations(),
            prediction_top_n: default_prediction_top_n(),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for the filesystem store. `None` uses the platform data dir.
    #[serde(default)]
    pub data_dir: Option<String>,
}

impl PlatformConfig {
    /// Load configuration from pharmyx.toml.
    /// Checks PHARMYX_CONFIG env var first, then current directory.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("PHARMYX_CONFIG")
            .unwrap_or_else(|_| "pharmyx.toml".to_string());

        if !Path::new(&path).exists() {
            anyhow::bail!("Config file not found: {}", path);
        }

        let content = std::fs::read_to_string(&path)?;
        let config: PlatformConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but falls back to defaults when no file exists.
    pub fn load_or_default() -> anyhow::Result<Self> {
        match Self::load() {
            Ok(config) => Ok(config),
            Err(e) if e.to_string().starts_with("Config file not found") => {
                warn!("{e}; using default configuration");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Load from YAML file
    pub fn from_yaml(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from JSON file
    pub fn from_json(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to YAML file
    pub fn to_yaml(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PharmyxError> {
        self.models.validate()?;
        for dt in DataType::ALL {
            if self.processing.feature_width(dt) == 0 {
                return Err(PharmyxError::Config(format!("{dt} feature width must be positive")));
            }
        }
        let f = &self.fusion;
        if !(0.0..=1.0).contains(&f.confidence_floor)
            || !(0.0..=1.0).contains(&f.confidence_ceiling)
            || f.confidence_floor >= f.confidence_ceiling
        {
            return Err(PharmyxError::Config(format!(
                "confidence range [{}, {}] must be an increasing sub-range of [0, 1]",
                f.confidence_floor, f.confidence_ceiling
            )));
        }
        if [f.genomics_weight, f.transcriptomics_weight, f.proteomics_weight]
            .iter()
            .any(|w| *w < 0.0 || !w.is_finite())
        {
            return Err(PharmyxError::Config("fusion weights must be non-negative".to_string()));
        }
        if self.training.max_concurrent_jobs == 0 {
            return Err(PharmyxError::Config("max_concurrent_jobs must be at least 1".to_string()));
        }
        Ok(())
    }
}
