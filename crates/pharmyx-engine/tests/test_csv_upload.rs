//! CSV uploads persisted through the filesystem store.

use std::sync::Arc;

use pharmyx_common::{DataType, PharmyxError, PlatformConfig};
use pharmyx_db::{FsStore, OmicsStore};
use pharmyx_engine::{Platform, PredictionRequest};
use pretty_assertions::assert_eq;
use pharmyx_test_utils::{init_tracing, raw_to_csv, write_temp_csv};

#[tokio::test(flavor = "multi_thread")]
async fn test_csv_upload_survives_reopen() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsStore::open(dir.path()).await.unwrap());
    let platform = Platform::new(PlatformConfig::default(), store).unwrap();

    let raw = platform.pipeline().create_sample_data(DataType::Transcriptomics, 30, 8);
    let csv = write_temp_csv(&raw_to_csv(&raw, "sample_id")).unwrap();

    let receipt = platform.upload(csv.path(), DataType::Transcriptomics, "TEST_TX_01").await.unwrap();
    assert_eq!(receipt.metadata.input_shape, (8, 30));
    assert_eq!(receipt.metadata.output_shape, (8, 128));

    // the same upload through the table path gives the same digest
    let (_, metadata) = platform
        .pipeline()
        .process_table(&raw, DataType::Transcriptomics, "TEST_TX_01")
        .unwrap();
    assert!(metadata.same_processing(&receipt.metadata));

    let reopened = FsStore::open(dir.path()).await.unwrap();
    let table = reopened
        .load_processed_data("TEST_TX_01", DataType::Transcriptomics)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(table.shape(), (8, 128));
    assert_eq!(reopened.get_database_stats().await.unwrap().total_tables, 1);

    let result = platform
        .predict(&PredictionRequest::new("TEST_TX_01", "paclitaxel"))
        .await
        .unwrap();
    assert_eq!(result.data_types_used(), vec![DataType::Transcriptomics]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bad_upload_leaves_platform_usable() {
    let platform = Platform::in_memory(PlatformConfig::default()).unwrap();

    let ragged = write_temp_csv("sample_id,P1,P2\nS1,1.0,2.0\nS2,3.0\n").unwrap();
    let err = platform.upload(ragged.path(), DataType::Proteomics, "TEST_BAD").await.unwrap_err();
    assert!(matches!(err, PharmyxError::DataFormat(_)), "got {err:?}");

    let text = write_temp_csv("sample_id,P1,P2\nS1,1.0,abc\nS2,3.0,4.0\n").unwrap();
    let err = platform.upload(text.path(), DataType::Proteomics, "TEST_BAD").await.unwrap_err();
    assert!(matches!(err, PharmyxError::DataFormat(_)), "got {err:?}");

    let good = write_temp_csv("sample_id,P1,P2\nS1,1.0,NA\nS2,3.0,4.0\nS3,2.0,5.0\n").unwrap();
    let receipt = platform.upload(good.path(), DataType::Proteomics, "TEST_OK").await.unwrap();
    assert_eq!(receipt.metadata.output_shape, (3, 48));
    assert!(platform.patient("TEST_BAD").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reupload_replaces_table() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsStore::open(dir.path()).await.unwrap());
    let platform = Platform::new(PlatformConfig::default(), store).unwrap();

    let first = write_temp_csv("sample_id,P1,P2\nS1,1.0,2.0\nS2,3.0,4.0\n").unwrap();
    platform.upload(first.path(), DataType::Proteomics, "TEST_RE_01").await.unwrap();

    let second = write_temp_csv("sample_id,P1,P2\nS1,1.0,2.0\nS2,3.0,4.0\nS3,5.0,6.0\nS4,7.0,9.0\n").unwrap();
    let receipt = platform.upload(second.path(), DataType::Proteomics, "TEST_RE_01").await.unwrap();
    assert_eq!(receipt.metadata.output_shape, (4, 48));

    let reopened = FsStore::open(dir.path()).await.unwrap();
    let table = reopened
        .load_processed_data("TEST_RE_01", DataType::Proteomics)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(table.shape(), (4, 48));
    assert_eq!(reopened.get_database_stats().await.unwrap().total_tables, 1);
}
