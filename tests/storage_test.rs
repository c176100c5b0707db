//! LibSQL storage integration tests

mod common;

use common::{create_test_storage, raw_tree};
use yearwrap_core::{
    error::UnlockError, privacy::hydration::DEFAULT_CAPTURE_PATHS, capture_hydration,
    ConnectionMode, HydrationPayload, LibsqlStorage, NewRecord, RecordId, RecordMetadata,
    Sanitizer, StatTree, StatsStorage, UnlockCode, UnlockGate, WrapError,
};

fn sanitized_record(year: i32, sent: f64) -> NewRecord {
    NewRecord::new(year, Sanitizer::default().sanitize(&raw_tree(sent, sent / 2.0)))
}

#[tokio::test]
async fn test_create_and_get_record() {
    let (storage, _dir) = create_test_storage().await;

    let mut record = sanitized_record(2024, 100.0);
    record.user_name = Some("Sam".to_string());
    record.metadata = RecordMetadata {
        sdk_version: Some("1.4.0".to_string()),
        ..RecordMetadata::default()
    };

    let id = storage.create_record(&record).await.unwrap();
    assert_eq!(id.as_str().len(), 8);

    let stored = storage.get_record(2024, &id).await.unwrap().unwrap();
    assert_eq!(stored.statistics, record.statistics);
    assert_eq!(stored.user_name.as_deref(), Some("Sam"));
    assert_eq!(stored.metadata.sdk_version.as_deref(), Some("1.4.0"));
    assert_eq!(stored.views, 0);
    assert!(!stored.unlockable());

    // Year is part of the address
    assert!(storage.get_record(2023, &id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_view_record_counts_every_view() {
    let (storage, _dir) = create_test_storage().await;
    let id = storage
        .create_record(&sanitized_record(2024, 10.0))
        .await
        .unwrap();

    for expected in 1..=3 {
        let viewed = storage.view_record(2024, &id).await.unwrap().unwrap();
        assert_eq!(viewed.views, expected);
    }

    let missing = RecordId::parse("zzzzzzzz").unwrap();
    assert!(storage.view_record(2024, &missing).await.unwrap().is_none());
    // A read does not count as a view
    assert_eq!(storage.get_record(2024, &id).await.unwrap().unwrap().views, 3);
}

#[tokio::test]
async fn test_concurrent_views_are_not_lost() {
    let (storage, _dir) = create_test_storage().await;
    let id = storage
        .create_record(&sanitized_record(2024, 10.0))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let storage = storage.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            storage.view_record(2024, &id).await.map(|r| r.is_some())
        }));
    }
    let mut succeeded = 0;
    for handle in handles {
        if let Ok(Ok(true)) = handle.await {
            succeeded += 1;
        }
    }

    let views = storage.get_record(2024, &id).await.unwrap().unwrap().views;
    assert_eq!(views, succeeded);
}

#[tokio::test]
async fn test_create_record_validation() {
    let (storage, _dir) = create_test_storage().await;

    let empty = NewRecord::new(2024, Sanitizer::default().sanitize(&StatTree::Null));
    assert!(matches!(
        storage.create_record(&empty).await,
        Err(WrapError::Validation(_))
    ));

    let mut orphan_payload = sanitized_record(2024, 5.0);
    orphan_payload.hydration = Some(HydrationPayload::new());
    assert!(matches!(
        storage.create_record(&orphan_payload).await,
        Err(WrapError::Validation(_))
    ));
}

#[tokio::test]
async fn test_unlock_round_trip() {
    let (storage, _dir) = create_test_storage().await;
    let raw = raw_tree(100.0, 50.0);
    let payload = capture_hydration(&raw, DEFAULT_CAPTURE_PATHS);
    let code = UnlockCode::parse("K7QX2M").unwrap();

    let record = NewRecord::new(2024, Sanitizer::default().sanitize(&raw))
        .with_hydration(payload.clone(), code);
    let id = storage.create_record(&record).await.unwrap();
    let plain = storage
        .create_record(&sanitized_record(2024, 3.0))
        .await
        .unwrap();

    let gate = UnlockGate::new(storage.clone());

    let revealed = gate.reveal_in_year(2024, &id, "k7qx2m").await.unwrap();
    assert_eq!(revealed, payload);

    assert!(matches!(
        gate.reveal_in_year(2024, &id, "K7QX2N").await,
        Err(WrapError::Unlock(UnlockError::Mismatch))
    ));
    assert!(matches!(
        gate.reveal_in_year(2023, &id, "K7QX2M").await,
        Err(WrapError::Unlock(UnlockError::NotFound))
    ));
    assert!(matches!(
        gate.reveal(&plain, "K7QX2M").await,
        Err(WrapError::Unlock(UnlockError::NoSecretConfigured))
    ));

    // Stored record is still sanitized and flagged unlockable
    let stored = storage.get_record(2024, &id).await.unwrap().unwrap();
    assert!(stored.unlockable());
    assert!(!serde_json::to_string(&stored).unwrap().contains("Ana Lima"));
}

#[tokio::test]
async fn test_list_records_filters_by_year() {
    let (storage, _dir) = create_test_storage().await;
    for (year, sent) in [(2023, 1.0), (2024, 2.0), (2024, 3.0)] {
        storage
            .create_record(&sanitized_record(year, sent))
            .await
            .unwrap();
    }

    assert_eq!(storage.list_records(None).await.unwrap().len(), 3);

    let only_2024 = storage.list_records(Some(2024)).await.unwrap();
    assert_eq!(only_2024.len(), 2);
    assert!(only_2024.iter().all(|r| r.year == 2024));

    assert!(storage.list_records(Some(2019)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_comparisons() {
    let (storage, _dir) = create_test_storage().await;
    let older = storage
        .create_record(&sanitized_record(2023, 10.0))
        .await
        .unwrap();
    let newer = storage
        .create_record(&sanitized_record(2024, 20.0))
        .await
        .unwrap();
    let same_year = storage
        .create_record(&sanitized_record(2024, 30.0))
        .await
        .unwrap();

    // Years are ordered earlier first regardless of argument order
    let comparison = storage.create_comparison(&newer, &older).await.unwrap();
    assert_eq!((comparison.year1, comparison.year2), (2023, 2024));
    assert_eq!(comparison.year1_id, older);
    assert_eq!(comparison.views, 0);

    assert!(matches!(
        storage.create_comparison(&newer, &same_year).await,
        Err(WrapError::Validation(_))
    ));
    let missing = RecordId::parse("nope1234").unwrap();
    assert!(matches!(
        storage.create_comparison(&older, &missing).await,
        Err(WrapError::NotFound(_))
    ));

    let viewed = storage
        .view_comparison(2024, 2023, &comparison.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(viewed.views, 1);
    assert_eq!(viewed.year2_id, newer);

    assert!(storage
        .view_comparison(2022, 2023, &comparison.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_completion_cache_keeps_first_entry() {
    let (storage, _dir) = create_test_storage().await;

    assert!(storage.cached_completion("abc").await.unwrap().is_none());
    storage
        .cache_completion("abc", "prompt", "first")
        .await
        .unwrap();
    storage
        .cache_completion("abc", "prompt", "second")
        .await
        .unwrap();

    assert_eq!(
        storage.cached_completion("abc").await.unwrap().as_deref(),
        Some("first")
    );
}

#[tokio::test]
async fn test_reopen_keeps_data_and_skips_applied_migrations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reopen.db").to_string_lossy().into_owned();

    let id = {
        let storage = LibsqlStorage::new_local(&path).await.unwrap();
        storage
            .create_record(&sanitized_record(2024, 7.0))
            .await
            .unwrap()
    };

    let reopened = LibsqlStorage::new_with_validation(ConnectionMode::Local(path), false)
        .await
        .unwrap();
    assert!(reopened.get_record(2024, &id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_missing_database_without_create() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.db").to_string_lossy().into_owned();

    let result = LibsqlStorage::new_with_validation(ConnectionMode::Local(path), false).await;
    assert!(matches!(result, Err(WrapError::Database(_))));
}
