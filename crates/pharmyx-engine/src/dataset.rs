//! Training-set assembly from the store.
//!
//! Every patient holding both a processed table of the requested type and a
//! processed drug-response table contributes one row per sample. All rows of
//! a patient share that patient's label and group.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use pharmyx_common::{is_padding_label, DataType, OmicsTable, PharmyxError, Result};
use pharmyx_db::OmicsStore;

/// Metric used as the label when a drug-response table carries it.
pub const PRIMARY_METRIC: &str = "ic50";

#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub data_type: DataType,
    pub x: OmicsTable,
    pub y: Vec<f64>,
    /// Patient id per row, used for grouped folds.
    pub groups: Vec<String>,
    pub n_patients: usize,
}

/// Column holding the primary response metric: `ic50` when present,
/// otherwise the first real column.
fn label_column(table: &OmicsTable) -> Option<usize> {
    let labels = table.col_labels();
    labels
        .iter()
        .position(|l| l.eq_ignore_ascii_case(PRIMARY_METRIC))
        .or_else(|| labels.first().filter(|l| !is_padding_label(l)).map(|_| 0))
}

/// Extract one label from a processed drug-response table.
///
/// With a drug, the value from that drug's row (case-insensitive). Without
/// one, the mean over all drug rows. `None` when nothing matches.
pub fn response_label(table: &OmicsTable, drug_id: Option<&str>) -> Option<f64> {
    let col = label_column(table)?;
    match drug_id {
        Some(drug) => {
            let drug = drug.trim();
            table
                .row_labels()
                .iter()
                .position(|r| r.trim().eq_ignore_ascii_case(drug))
                .map(|r| table.get(r, col))
                .filter(|v| v.is_finite())
        }
        None => {
            let values: Vec<f64> = table.column(col).into_iter().filter(|v| v.is_finite()).collect();
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
    }
}

/// Labels for the given patients. Patients without a usable label are left out.
pub async fn patient_labels(
    store: &dyn OmicsStore,
    patients: &[String],
    drug_id: Option<&str>,
) -> Result<BTreeMap<String, f64>> {
    let mut labels = BTreeMap::new();
    for patient_id in patients {
        let Some(response) = store.load_processed_data(patient_id, DataType::DrugResponse).await? else {
            continue;
        };
        if let Some(label) = response_label(&response, drug_id) {
            labels.insert(patient_id.clone(), label);
        }
    }
    Ok(labels)
}

/// Build the training set for one predictive data type.
pub async fn assemble(
    store: &dyn OmicsStore,
    data_type: DataType,
    drug_id: Option<&str>,
) -> Result<TrainingSet> {
    let data_type = data_type.require_predictive()?;
    let patients = store.list_patients().await?;
    let labels = patient_labels(store, &patients, drug_id).await?;

    let mut tables = Vec::new();
    let mut y = Vec::new();
    let mut groups = Vec::new();
    for (patient_id, label) in &labels {
        let Some(table) = store.load_processed_data(patient_id, data_type).await? else {
            continue;
        };
        if table.n_rows() == 0 {
            continue;
        }
        y.extend(std::iter::repeat(*label).take(table.n_rows()));
        groups.extend(std::iter::repeat(patient_id.clone()).take(table.n_rows()));
        tables.push(table);
    }

    if tables.is_empty() {
        warn!(%data_type, drug = ?drug_id, "No labelled patients for training");
        return Err(PharmyxError::InsufficientData { required: 1, actual: 0 });
    }

    let refs: Vec<&OmicsTable> = tables.iter().collect();
    let x = OmicsTable::vstack(&refs)?;
    debug!(%data_type, rows = x.n_rows(), patients = tables.len(), "Assembled training set");

    Ok(TrainingSet { data_type, x, y, groups, n_patients: tables.len() })
}
