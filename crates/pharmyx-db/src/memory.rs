//! In-memory store, used by tests and embedded callers.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use pharmyx_common::{DataType, DatabaseStats, OmicsTable, Patient, StoredTable};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::store::{stats_from, validate_patient_id, Attributes, OmicsStore};

#[derive(Default)]
struct Inner {
    patients: BTreeMap<String, Patient>,
    tables: HashMap<(String, DataType), OmicsTable>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn location(patient_id: &str, data_type: DataType) -> String {
        format!("memory://{patient_id}/{data_type}")
    }
}

#[async_trait]
impl OmicsStore for MemoryStore {
    async fn store_processed_data(
        &self,
        patient_id: &str,
        data_type: DataType,
        table: &OmicsTable,
    ) -> Result<String> {
        validate_patient_id(patient_id)?;
        let location = Self::location(patient_id, data_type);
        let now = Utc::now();

        let mut inner = self.inner.write().await;
        let patient = inner
            .patients
            .entry(patient_id.to_string())
            .or_insert_with(|| Patient::new(patient_id, BTreeMap::new()));
        patient.omics.insert(data_type, StoredTable {
            location: location.clone(),
            shape: table.shape(),
            updated_at: now,
        });
        patient.updated_at = now;
        inner.tables.insert((patient_id.to_string(), data_type), table.clone());

        debug!(patient_id, %data_type, shape = ?table.shape(), "Stored processed table");
        Ok(location)
    }

    async fn load_processed_data(
        &self,
        patient_id: &str,
        data_type: DataType,
    ) -> Result<Option<OmicsTable>> {
        let inner = self.inner.read().await;
        Ok(inner.tables.get(&(patient_id.to_string(), data_type)).cloned())
    }

    async fn create_patient(&self, patient_id: &str, attributes: Attributes) -> Result<bool> {
        validate_patient_id(patient_id)?;
        let mut inner = self.inner.write().await;
        if inner.patients.contains_key(patient_id) {
            return Ok(false);
        }
        inner
            .patients
            .insert(patient_id.to_string(), Patient::new(patient_id, attributes));
        Ok(true)
    }

    async fn get_patient(&self, patient_id: &str) -> Result<Option<Patient>> {
        Ok(self.inner.read().await.patients.get(patient_id).cloned())
    }

    async fn get_database_stats(&self) -> Result<DatabaseStats> {
        Ok(stats_from(self.inner.read().await.patients.values()))
    }

    async fn list_patients(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().await.patients.keys().cloned().collect())
    }
}
