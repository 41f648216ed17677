//! Storage collaborator interface.
//!
//! The engine only ever talks to persistence through [`OmicsStore`]. Processed
//! tables are keyed by `(patient_id, DataType)`; writing a key replaces the
//! previous table for that patient and type.

use std::collections::BTreeMap;

use async_trait::async_trait;
use pharmyx_common::{DataType, DatabaseStats, OmicsTable, Patient};

use crate::error::{DbError, Result};

pub type Attributes = BTreeMap<String, serde_json::Value>;

#[async_trait]
pub trait OmicsStore: Send + Sync {
    /// Persist a processed table and return its location.
    /// Creates the patient record if it does not exist yet.
    async fn store_processed_data(
        &self,
        patient_id: &str,
        data_type: DataType,
        table: &OmicsTable,
    ) -> Result<String>;

    async fn load_processed_data(
        &self,
        patient_id: &str,
        data_type: DataType,
    ) -> Result<Option<OmicsTable>>;

    /// Returns `false` when the patient already existed.
    async fn create_patient(&self, patient_id: &str, attributes: Attributes) -> Result<bool>;

    async fn get_patient(&self, patient_id: &str) -> Result<Option<Patient>>;

    async fn get_database_stats(&self) -> Result<DatabaseStats>;

    /// All patient ids in ascending order.
    async fn list_patients(&self) -> Result<Vec<String>>;
}

/// Reject ids that are empty or would escape a directory layout.
pub fn validate_patient_id(patient_id: &str) -> Result<()> {
    let trimmed = patient_id.trim();
    if trimmed.is_empty()
        || trimmed != patient_id
        || patient_id.contains(['/', '\\'])
        || patient_id == "."
        || patient_id == ".."
    {
        return Err(DbError::InvalidKey(format!("patient id {patient_id:?}")));
    }
    Ok(())
}

pub(crate) fn stats_from<'a>(patients: impl Iterator<Item = &'a Patient>) -> DatabaseStats {
    let mut stats = DatabaseStats::default();
    for patient in patients {
        stats.total_patients += 1;
        for data_type in patient.omics.keys() {
            stats.total_tables += 1;
            *stats.tables_by_type.entry(*data_type).or_insert(0) += 1;
        }
    }
    stats
}
