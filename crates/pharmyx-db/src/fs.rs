//! Filesystem store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/patients.json
//! <root>/processed/<patient_id>/<data_type>.csv
//! ```
//!
//! Tables are written as CSV with a `sample_id` header cell followed by the
//! feature labels. The patient index is rewritten on every change. Both go
//! through a temporary file and a rename, so readers see either the old or
//! the new contents. Writes hold the index lock until the index is on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use pharmyx_common::{DataType, DatabaseStats, OmicsTable, Patient, StoredTable};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{DbError, Result};
use crate::store::{stats_from, validate_patient_id, Attributes, OmicsStore};

const PATIENT_INDEX: &str = "patients.json";
const PROCESSED_DIR: &str = "processed";
const ROW_HEADER: &str = "sample_id";

pub struct FsStore {
    root: PathBuf,
    patients: RwLock<BTreeMap<String, Patient>>,
}

impl FsStore {
    /// Open (or create) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join(PROCESSED_DIR)).await?;

        let index = root.join(PATIENT_INDEX);
        let patients = if tokio::fs::try_exists(&index).await? {
            let content = tokio::fs::read(&index).await?;
            serde_json::from_slice(&content)?
        } else {
            BTreeMap::new()
        };

        info!(root = %root.display(), patients = patients.len(), "Opened filesystem store");
        Ok(Self { root, patients: RwLock::new(patients) })
    }

    /// Open the store at `data_dir`, or at the platform data dir when unset.
    pub async fn open_default(data_dir: Option<&str>) -> Result<Self> {
        let root = match data_dir {
            Some(dir) => PathBuf::from(dir),
            None      => Self::default_data_dir(),
        };
        Self::open(root).await
    }

    fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".data"))
            .join("pharmyx")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, patient_id: &str, data_type: DataType) -> PathBuf {
        self.root
            .join(PROCESSED_DIR)
            .join(patient_id)
            .join(format!("{data_type}.csv"))
    }

    async fn persist_index(&self, patients: &BTreeMap<String, Patient>) -> Result<()> {
        let content = serde_json::to_vec_pretty(patients)?;
        write_atomic(&self.root.join(PATIENT_INDEX), &content).await
    }

    /// Persist the index, restoring `previous` for `patient_id` in memory if
    /// the write fails.
    async fn commit(
        &self,
        patients: &mut BTreeMap<String, Patient>,
        patient_id: &str,
        previous: Option<Patient>,
    ) -> Result<()> {
        if let Err(e) = self.persist_index(patients).await {
            warn!(patient_id, "Patient index write failed, rolling back: {}", e);
            match previous {
                Some(patient) => patients.insert(patient_id.to_string(), patient),
                None          => patients.remove(patient_id),
            };
            return Err(e);
        }
        Ok(())
    }
}

/// Write `<path>.tmp`, then rename it over `path`. Callers serialize writers
/// to the same path.
async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn encode_table(table: &OmicsTable) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = Vec::with_capacity(table.n_cols() + 1);
    header.push(ROW_HEADER.to_string());
    header.extend(table.col_labels().iter().cloned());
    writer.write_record(&header)?;

    for (label, row) in table.row_labels().iter().zip(table.rows()) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(label.clone());
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer
        .into_inner()
        .map_err(|e| DbError::Io(e.into_error()))
}

fn decode_table(location: &str, bytes: &[u8]) -> Result<OmicsTable> {
    let corrupt = |reason: String| DbError::Corrupt { location: location.to_string(), reason };

    let mut reader = csv::Reader::from_reader(bytes);
    let col_labels: Vec<String> = reader.headers()?.iter().skip(1).map(str::to_string).collect();

    let mut row_labels = Vec::new();
    let mut data = Vec::new();
    for result in reader.records() {
        let record = result?;
        let mut cells = record.iter();
        let label = cells.next().ok_or_else(|| corrupt("empty record".to_string()))?;
        row_labels.push(label.to_string());
        for cell in cells {
            let value = cell
                .parse::<f64>()
                .map_err(|_| corrupt(format!("non-numeric cell {cell:?} in row {label}")))?;
            data.push(value);
        }
    }
    OmicsTable::new(row_labels, col_labels, data).map_err(|e| corrupt(e.to_string()))
}

#[async_trait]
impl OmicsStore for FsStore {
    async fn store_processed_data(
        &self,
        patient_id: &str,
        data_type: DataType,
        table: &OmicsTable,
    ) -> Result<String> {
        validate_patient_id(patient_id)?;
        let encoded = encode_table(table)?;
        let path = self.table_path(patient_id, data_type);
        let location = path.display().to_string();

        let mut patients = self.patients.write().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(&path, &encoded).await?;

        let now = Utc::now();
        let previous = patients.get(patient_id).cloned();
        let patient = patients
            .entry(patient_id.to_string())
            .or_insert_with(|| Patient::new(patient_id, BTreeMap::new()));
        patient.omics.insert(data_type, StoredTable {
            location: location.clone(),
            shape: table.shape(),
            updated_at: now,
        });
        patient.updated_at = now;
        self.commit(&mut patients, patient_id, previous).await?;

        debug!(patient_id, %data_type, %location, "Stored processed table");
        Ok(location)
    }

    async fn load_processed_data(
        &self,
        patient_id: &str,
        data_type: DataType,
    ) -> Result<Option<OmicsTable>> {
        // Held across the read so the file matches the indexed entry
        let patients = self.patients.read().await;
        let Some(stored) = patients.get(patient_id).and_then(|p| p.omics.get(&data_type)) else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(&stored.location).await?;
        decode_table(&stored.location, &bytes).map(Some)
    }

    async fn create_patient(&self, patient_id: &str, attributes: Attributes) -> Result<bool> {
        validate_patient_id(patient_id)?;
        let mut patients = self.patients.write().await;
        if patients.contains_key(patient_id) {
            return Ok(false);
        }
        patients.insert(patient_id.to_string(), Patient::new(patient_id, attributes));
        self.commit(&mut patients, patient_id, None).await?;
        Ok(true)
    }

    async fn get_patient(&self, patient_id: &str) -> Result<Option<Patient>> {
        Ok(self.patients.read().await.get(patient_id).cloned())
    }

    async fn get_database_stats(&self) -> Result<DatabaseStats> {
        Ok(stats_from(self.patients.read().await.values()))
    }

    async fn list_patients(&self) -> Result<Vec<String>> {
        Ok(self.patients.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> OmicsTable {
        OmicsTable::from_rows(
            vec!["s0".to_string(), "s1".to_string()],
            vec!["EGFR".to_string(), "__pad_000".to_string()],
            vec![vec![0.1234567890123, 0.0], vec![-1.5, 0.0]],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        let table = sample_table();

        let location = store
            .store_processed_data("P1", DataType::Proteomics, &table)
            .await
            .unwrap();
        assert!(location.ends_with("proteomics.csv"));

        let loaded = store.load_processed_data("P1", DataType::Proteomics).await.unwrap().unwrap();
        assert_eq!(loaded, table);
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsStore::open(dir.path()).await.unwrap();
            let mut attrs = Attributes::new();
            attrs.insert("gender".to_string(), serde_json::json!("F"));
            store.create_patient("P7", attrs).await.unwrap();
            store
                .store_processed_data("P7", DataType::Genomics, &sample_table())
                .await
                .unwrap();
        }

        let store = FsStore::open(dir.path()).await.unwrap();
        let patient = store.get_patient("P7").await.unwrap().unwrap();
        assert_eq!(patient.attributes["gender"], serde_json::json!("F"));
        assert!(patient.has(DataType::Genomics));

        let stats = store.get_database_stats().await.unwrap();
        assert_eq!(stats.total_patients, 1);
        assert_eq!(stats.total_tables, 1);
        assert!(store.load_processed_data("P7", DataType::Genomics).await.unwrap().is_some());
    }

    fn wide_table(value: f64) -> OmicsTable {
        OmicsTable::from_rows(
            (0..3).map(|i| format!("s{i}")).collect(),
            (0..4).map(|j| format!("G{j}")).collect(),
            vec![vec![value; 4]; 3],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_overwrite_replaces_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        store.store_processed_data("P1", DataType::Genomics, &sample_table()).await.unwrap();
        store.store_processed_data("P1", DataType::Genomics, &wide_table(2.5)).await.unwrap();

        let loaded = store.load_processed_data("P1", DataType::Genomics).await.unwrap().unwrap();
        assert_eq!(loaded, wide_table(2.5));
        let patient = store.get_patient("P1").await.unwrap().unwrap();
        assert_eq!(patient.omics[&DataType::Genomics].shape, (3, 4));
        assert!(!dir.path().join("processed/P1/genomics.csv.tmp").exists());

        let reopened = FsStore::open(dir.path()).await.unwrap();
        let loaded = reopened.load_processed_data("P1", DataType::Genomics).await.unwrap().unwrap();
        assert_eq!(loaded, wide_table(2.5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FsStore::open(dir.path()).await.unwrap());
        store.store_processed_data("P1", DataType::Proteomics, &wide_table(0.0)).await.unwrap();

        let mut handles = Vec::new();
        for i in 1..=8 {
            let writer = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                writer
                    .store_processed_data("P1", DataType::Proteomics, &wide_table(i as f64))
                    .await
                    .map(|_| ())
            }));
            let reader = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                // every read sees a complete table
                let table = reader.load_processed_data("P1", DataType::Proteomics).await?;
                assert_eq!(table.map(|t| t.shape()), Some((3, 4)));
                Ok::<(), DbError>(())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let last = store.load_processed_data("P1", DataType::Proteomics).await.unwrap().unwrap();
        let value = last.get(0, 0);
        assert!((1.0..=8.0).contains(&value));
        assert_eq!(last, wide_table(value));
    }

    #[tokio::test]
    async fn test_failed_index_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        // a directory where the index file should go makes the rename fail
        std::fs::create_dir_all(dir.path().join(PATIENT_INDEX).join("blocker")).unwrap();

        assert!(store.store_processed_data("P1", DataType::Genomics, &sample_table()).await.is_err());
        assert!(store.get_patient("P1").await.unwrap().is_none());
        assert!(store.load_processed_data("P1", DataType::Genomics).await.unwrap().is_none());

        assert!(store.create_patient("P2", Attributes::new()).await.is_err());
        assert!(store.list_patients().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        let err = store
            .store_processed_data("../x", DataType::Genomics, &sample_table())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidKey(_)));
    }
}
