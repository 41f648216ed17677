//! Shared fixtures for Pharmyx tests: tracing setup, synthetic cohorts and
//! temporary CSV uploads.

use std::io::Write;
use std::sync::Once;

use anyhow::Context;
use tempfile::NamedTempFile;
use tracing_subscriber::EnvFilter;

use pharmyx_common::{DataType, ProcessingConfig, RawTable};
use pharmyx_db::OmicsStore;
use pharmyx_processing::ProcessingPipeline;

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness. `RUST_LOG` overrides
/// the default `warn` level. Safe to call from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Shape of a synthetic cohort.
#[derive(Debug, Clone)]
pub struct CohortSpec {
    pub prefix: String,
    pub patients: usize,
    pub samples_per_patient: usize,
    pub drugs: usize,
    pub data_types: Vec<DataType>,
}

impl Default for CohortSpec {
    fn default() -> Self {
        Self {
            prefix: "TEST".to_string(),
            patients: 8,
            samples_per_patient: 6,
            drugs: 3,
            data_types: DataType::PREDICTIVE.to_vec(),
        }
    }
}

impl CohortSpec {
    pub fn with_patients(mut self, patients: usize) -> Self {
        self.patients = patients;
        self
    }

    pub fn with_data_types(mut self, data_types: impl IntoIterator<Item = DataType>) -> Self {
        self.data_types = data_types.into_iter().collect();
        self
    }

    pub fn patient_id(&self, index: usize) -> String {
        format!("{}_{index:03}", self.prefix)
    }
}

/// Raw feature count used for each type's synthetic uploads.
fn raw_features(data_type: DataType) -> usize {
    match data_type {
        DataType::Genomics        => 50,
        DataType::Transcriptomics => 60,
        DataType::Proteomics      => 24,
        DataType::DrugResponse    => 5,
    }
}

/// Upload a synthetic cohort through the processing pipeline.
///
/// Each patient gets its own sample seed, so tables differ between patients
/// but the cohort as a whole is reproducible. Every patient also gets a
/// drug-response table covering `cohort.drugs` drugs.
pub async fn seed_cohort(store: &dyn OmicsStore, cohort: &CohortSpec) -> anyhow::Result<Vec<String>> {
    let mut ids = Vec::with_capacity(cohort.patients);
    for index in 0..cohort.patients {
        let patient_id = cohort.patient_id(index);
        let pipeline = ProcessingPipeline::new(ProcessingConfig {
            sample_seed: 1_000 + index as u64 * 101,
            ..ProcessingConfig::default()
        });

        for &data_type in &cohort.data_types {
            let raw = pipeline.create_sample_data(data_type, raw_features(data_type), cohort.samples_per_patient);
            pipeline
                .ingest(store, raw.into(), data_type, &patient_id)
                .await
                .with_context(|| format!("seeding {data_type} for {patient_id}"))?;
        }
        let response = pipeline.create_sample_data(DataType::DrugResponse, raw_features(DataType::DrugResponse), cohort.drugs);
        pipeline
            .ingest(store, response.into(), DataType::DrugResponse, &patient_id)
            .await
            .with_context(|| format!("seeding drug response for {patient_id}"))?;

        ids.push(patient_id);
    }
    Ok(ids)
}

/// Render a raw table as CSV text, row labels first.
pub fn raw_to_csv(table: &RawTable, corner: &str) -> String {
    let mut out = String::new();
    out.push_str(corner);
    for label in &table.col_labels {
        out.push(',');
        out.push_str(label);
    }
    out.push('\n');
    for (label, row) in table.row_labels.iter().zip(&table.cells) {
        out.push_str(label);
        for cell in row {
            out.push(',');
            out.push_str(cell);
        }
        out.push('\n');
    }
    out
}

/// Write `contents` to a temporary `.csv` file that lives as long as the handle.
pub fn write_temp_csv(contents: &str) -> anyhow::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().prefix("pharmyx-").suffix(".csv").tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_to_csv_layout() {
        let table = RawTable {
            row_labels: vec!["s1".into(), "s2".into()],
            col_labels: vec!["a".into(), "b".into()],
            cells: vec![vec!["1".into(), "2".into()], vec!["3".into(), "NA".into()]],
        };
        assert_eq!(raw_to_csv(&table, "sample_id"), "sample_id,a,b\ns1,1,2\ns2,3,NA\n");
    }

    #[test]
    fn test_patient_ids_are_stable() {
        let cohort = CohortSpec::default();
        assert_eq!(cohort.patient_id(7), "TEST_007");
    }
}
