//! Processing pipeline orchestrator.
//!
//! Routes each upload to the normalizer for its declared data type:
//!   1. Decode the upload (CSV path or an already decoded table)
//!   2. Normalize with the per-type step sequence
//!   3. Persist the processed table through the storage collaborator
//!
//! The pipeline owns orientation and width policy through its
//! [`ProcessingConfig`]. A bad upload is returned to its caller as an error
//! and leaves the pipeline usable for the next one.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, instrument};

use pharmyx_common::{
    DataType, OmicsTable, Orientation, ProcessingConfig, ProcessingMetadata, RawTable, Result,
};
use pharmyx_db::OmicsStore;

use crate::loader;
use crate::normalizer::OmicsNormalizer;

/// Drug names used for synthetic drug-response rows.
const SAMPLE_DRUGS: &[&str] = &[
    "erlotinib", "gefitinib", "cisplatin", "paclitaxel", "doxorubicin",
    "imatinib", "sorafenib", "tamoxifen", "olaparib", "trametinib",
];

/// Response metrics used for synthetic drug-response columns.
const SAMPLE_METRICS: &[&str] = &["ic50", "auc", "viability", "emax", "hill_slope"];

// ── Upload types ──────────────────────────────────────────────────────────────

/// Where an upload comes from.
#[derive(Debug, Clone)]
pub enum UploadSource {
    Path(PathBuf),
    Table(RawTable),
}

impl From<&Path> for UploadSource {
    fn from(path: &Path) -> Self {
        UploadSource::Path(path.to_path_buf())
    }
}

impl From<RawTable> for UploadSource {
    fn from(table: RawTable) -> Self {
        UploadSource::Table(table)
    }
}

/// Returned to the uploader once a table is processed and stored.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub patient_id: String,
    pub data_type: DataType,
    pub location: String,
    pub metadata: ProcessingMetadata,
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProcessingPipeline {
    config: ProcessingConfig,
    genomics: OmicsNormalizer,
    transcriptomics: OmicsNormalizer,
    proteomics: OmicsNormalizer,
    drug_response: OmicsNormalizer,
}

impl Default for ProcessingPipeline {
    fn default() -> Self {
        Self::new(ProcessingConfig::default())
    }
}

impl ProcessingPipeline {
    pub fn new(config: ProcessingConfig) -> Self {
        Self {
            genomics: OmicsNormalizer::new(DataType::Genomics, &config),
            transcriptomics: OmicsNormalizer::new(DataType::Transcriptomics, &config),
            proteomics: OmicsNormalizer::new(DataType::Proteomics, &config),
            drug_response: OmicsNormalizer::new(DataType::DrugResponse, &config),
            config,
        }
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn normalizer(&self, data_type: DataType) -> &OmicsNormalizer {
        match data_type {
            DataType::Genomics        => &self.genomics,
            DataType::Transcriptomics => &self.transcriptomics,
            DataType::Proteomics      => &self.proteomics,
            DataType::DrugResponse    => &self.drug_response,
        }
    }

    /// Decode a CSV upload and normalize it.
    #[instrument(skip(self, path))]
    pub fn process_file(
        &self,
        path: impl AsRef<Path>,
        data_type: DataType,
        patient_id: &str,
    ) -> Result<(OmicsTable, ProcessingMetadata)> {
        let raw = loader::read_csv(path.as_ref())?;
        self.process_table(&raw, data_type, patient_id)
    }

    /// Normalize an already decoded upload.
    #[instrument(skip(self, raw), fields(shape = ?raw.shape()))]
    pub fn process_table(
        &self,
        raw: &RawTable,
        data_type: DataType,
        patient_id: &str,
    ) -> Result<(OmicsTable, ProcessingMetadata)> {
        let (table, metadata) = self.normalizer(data_type).process(raw)?;
        info!(
            patient_id,
            %data_type,
            input = ?metadata.input_shape,
            output = ?metadata.output_shape,
            dropped = metadata.dropped_features,
            padded = metadata.padded_features,
            "Processed upload"
        );
        Ok((table, metadata))
    }

    /// Process an upload and persist it, creating the patient if needed.
    #[instrument(skip(self, store, source))]
    pub async fn ingest(
        &self,
        store: &dyn OmicsStore,
        source: UploadSource,
        data_type: DataType,
        patient_id: &str,
    ) -> Result<UploadReceipt> {
        let (table, metadata) = match &source {
            UploadSource::Path(path)  => self.process_file(path, data_type, patient_id)?,
            UploadSource::Table(raw)  => self.process_table(raw, data_type, patient_id)?,
        };
        let location = store.store_processed_data(patient_id, data_type, &table).await?;
        Ok(UploadReceipt {
            patient_id: patient_id.to_string(),
            data_type,
            location,
            metadata,
        })
    }

    /// Deterministic synthetic upload in the raw orientation of `data_type`.
    ///
    /// `n_features` counts features (or metrics for drug response) and
    /// `n_samples` counts samples (or drugs). Genomics comes back
    /// features x samples; every other type is samples x features.
    pub fn create_sample_data(
        &self,
        data_type: DataType,
        n_features: usize,
        n_samples: usize,
    ) -> RawTable {
        let type_offset = DataType::ALL.iter().position(|d| *d == data_type).unwrap_or(0) as u64;
        let mut rng = StdRng::seed_from_u64(self.config.sample_seed.wrapping_add(type_offset));

        let samples: Vec<String> = match data_type {
            DataType::DrugResponse => (0..n_samples).map(sample_drug).collect(),
            _ => (0..n_samples).map(|j| format!("SAMPLE_{j:03}")).collect(),
        };
        let features: Vec<String> = (0..n_features)
            .map(|i| match data_type {
                DataType::Genomics        => format!("rs{}", 100_000 + i * 37),
                DataType::Transcriptomics => format!("GENE_{i:04}"),
                DataType::Proteomics      => format!("PROT_{i:04}"),
                DataType::DrugResponse    => sample_metric(i),
            })
            .collect();

        // Values are drawn per (sample, feature) in sample-major order
        let values: Vec<Vec<f64>> = (0..n_samples)
            .map(|_| {
                (0..n_features)
                    .map(|i| match data_type {
                        DataType::Genomics => {
                            let freq = 0.1 + 0.8 * ((i * 7919) % 101) as f64 / 100.0;
                            (0..2).filter(|_| rng.gen::<f64>() < freq).count() as f64
                        }
                        DataType::Transcriptomics => {
                            (5.0 + 1.5 * standard_normal(&mut rng)).exp().round()
                        }
                        DataType::Proteomics => 20.0 + 2.0 * standard_normal(&mut rng),
                        DataType::DrugResponse => match i {
                            0 => 10f64.powf(rng.gen_range(-2.0..2.0)),
                            1 => rng.gen_range(0.1..1.0),
                            _ => rng.gen_range(0.0..100.0),
                        },
                    })
                    .collect()
            })
            .collect();

        let sample_major = RawTable {
            row_labels: samples,
            col_labels: features,
            cells: values
                .iter()
                .map(|row| row.iter().map(|v| v.to_string()).collect())
                .collect(),
        };
        match data_type.raw_orientation() {
            Orientation::SampleMajor  => sample_major,
            Orientation::FeatureMajor => sample_major.transpose(),
        }
    }
}

fn sample_drug(i: usize) -> String {
    SAMPLE_DRUGS
        .get(i)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("drug_{i:03}"))
}

fn sample_metric(i: usize) -> String {
    SAMPLE_METRICS
        .get(i)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("metric_{i:02}"))
}

/// Box-Muller draw from N(0, 1).
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmyx_common::PharmyxError;
    use pharmyx_db::MemoryStore;
    use pretty_assertions::assert_eq;

    const COLUMN_COUNTS: [usize; 5] = [3, 5, 8, 15, 20];

    #[test]
    fn test_any_column_count_reaches_declared_width() {
        let pipeline = ProcessingPipeline::default();
        for dt in DataType::ALL {
            for n in COLUMN_COUNTS {
                // raw column count is samples for genomics, features otherwise
                let raw = match dt.raw_orientation() {
                    Orientation::FeatureMajor => pipeline.create_sample_data(dt, 12, n),
                    Orientation::SampleMajor  => pipeline.create_sample_data(dt, n, 6),
                };
                assert_eq!(raw.n_cols(), n, "{dt}");
                let (table, meta) = pipeline.process_table(&raw, dt, "P").unwrap();
                assert_eq!(table.n_cols(), dt.default_feature_width(), "{dt} with {n} columns");
                assert_eq!(meta.output_shape, table.shape());
                assert!(table.all_finite());
            }
        }
    }

    #[test]
    fn test_reprocessing_is_idempotent() {
        let pipeline = ProcessingPipeline::default();
        for dt in DataType::ALL {
            let raw = pipeline.create_sample_data(dt, 10, 7);
            let (t1, m1) = pipeline.process_table(&raw, dt, "P").unwrap();
            let (t2, m2) = pipeline.process_table(&raw, dt, "P").unwrap();
            assert!(m1.same_processing(&m2), "{dt}");
            assert_eq!(t1, t2);
        }
    }

    #[test]
    fn test_sample_data_is_deterministic_and_oriented() {
        let pipeline = ProcessingPipeline::default();
        let a = pipeline.create_sample_data(DataType::Genomics, 50, 10);
        let b = pipeline.create_sample_data(DataType::Genomics, 50, 10);
        assert_eq!(a, b);
        assert_eq!(a.shape(), (50, 10));
        assert!(a.cells.iter().flatten().all(|c| c == "0" || c == "1" || c == "2"));

        let drugs = pipeline.create_sample_data(DataType::DrugResponse, 3, 2);
        assert_eq!(drugs.row_labels, vec!["erlotinib", "gefitinib"]);
        assert_eq!(drugs.col_labels, vec!["ic50", "auc", "viability"]);
    }

    #[test]
    fn test_bad_upload_does_not_poison_pipeline() {
        let pipeline = ProcessingPipeline::default();
        let bad = RawTable::new(
            vec!["S1".into()],
            vec!["A".into()],
            vec![vec!["oops".into()]],
        )
        .unwrap();
        assert!(matches!(
            pipeline.process_table(&bad, DataType::Proteomics, "P"),
            Err(PharmyxError::DataFormat(_))
        ));
        let good = pipeline.create_sample_data(DataType::Proteomics, 8, 4);
        assert!(pipeline.process_table(&good, DataType::Proteomics, "P").is_ok());
    }

    #[test]
    fn test_process_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proteomics.csv");
        std::fs::write(&path, "sample,P1,P2\nS1,1,2\nS2,3,NA\n").unwrap();
        let pipeline = ProcessingPipeline::default();
        let (table, meta) = pipeline.process_file(&path, DataType::Proteomics, "P").unwrap();
        assert_eq!(table.shape(), (2, 48));
        assert_eq!(meta.input_shape, (2, 2));
    }

    #[tokio::test]
    async fn test_ingest_stores_and_creates_patient() {
        let store = MemoryStore::new();
        let pipeline = ProcessingPipeline::default();
        let raw = pipeline.create_sample_data(DataType::Genomics, 50, 10);

        let receipt = pipeline
            .ingest(&store, raw.into(), DataType::Genomics, "TEST_GEN_15")
            .await
            .unwrap();
        assert_eq!(receipt.metadata.output_shape, (10, 64));

        let patient = store.get_patient("TEST_GEN_15").await.unwrap().unwrap();
        assert_eq!(patient.omics[&DataType::Genomics].location, receipt.location);
    }
}
