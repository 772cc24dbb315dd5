//! Integration tests for collection access and lifecycle
//!
//! Strict lookups, on-demand creation, truncation and idempotent drops,
//! exercised through the public `Historian` API over the in-memory backend.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tidemark::backend::MemoryBackend;
use tidemark::{
    AttrValue, AttributeKey, Config, DataModel, Error, GetCollectionOpts, Historian, RawQuery,
    Resolution, StoragePolicy,
};

// ============================================================================
// Helper Functions
// ============================================================================

fn historian() -> Historian {
    Historian::with_backend(Arc::new(MemoryBackend::new()), Config::default())
}

fn policy(data_model: DataModel) -> StoragePolicy {
    StoragePolicy {
        data_model,
        hash_names: false,
        resolutions: Resolution::ALL.to_vec(),
    }
}

fn key() -> AttributeKey {
    AttributeKey {
        service: "factory".into(),
        service_path: "/floor1".into(),
        entity_id: "press7".into(),
        entity_type: "Machine".into(),
        attr_name: "temperature".into(),
        attr_type: "Number".into(),
    }
}

// ============================================================================
// Strict Lookup and Creation
// ============================================================================

#[tokio::test]
async fn test_strict_lookup_of_missing_collection_fails_without_creating() {
    let historian = historian();

    for is_aggregated in [false, true] {
        let result = historian
            .get_collection(
                &key(),
                &policy(DataModel::PerEntity),
                GetCollectionOpts {
                    should_create: false,
                    is_aggregated,
                    should_store_hash: false,
                    should_truncate: false,
                },
            )
            .await;
        assert!(matches!(result, Err(Error::CollectionNotFound(_))));
    }

    // The strict misses must not have created anything.
    let result = historian
        .get_collection(
            &key(),
            &policy(DataModel::PerEntity),
            GetCollectionOpts::default(),
        )
        .await;
    assert!(matches!(result, Err(Error::CollectionNotFound(_))));
}

#[tokio::test]
async fn test_create_then_strict_lookup_succeeds() {
    let historian = historian();
    let policy = policy(DataModel::PerEntity);

    let created = historian
        .get_collection(
            &key(),
            &policy,
            GetCollectionOpts {
                should_create: true,
                ..GetCollectionOpts::default()
            },
        )
        .await
        .expect("create");

    let found = historian
        .get_collection(&key(), &policy, GetCollectionOpts::default())
        .await
        .expect("strict lookup");
    assert_eq!(found.collection, created.collection);
}

#[tokio::test]
async fn test_collection_creation_per_data_model_is_distinct() {
    let historian = historian();
    let mut names = Vec::new();
    for data_model in DataModel::ALL {
        let access = historian
            .get_collection(
                &key(),
                &policy(data_model),
                GetCollectionOpts {
                    should_create: true,
                    ..GetCollectionOpts::default()
                },
            )
            .await
            .expect("create");
        names.push(access.collection.collection);
    }
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 3, "one physical collection per data model");
}

// ============================================================================
// Truncate and Drop
// ============================================================================

#[tokio::test]
async fn test_truncate_empties_an_existing_collection() {
    let historian = historian();
    let policy = policy(DataModel::PerEntity);
    let at = Utc.with_ymd_and_hms(2024, 3, 15, 10, 42, 37).unwrap();

    historian
        .store_raw_data(&key(), &policy, at, &AttrValue::Number(21.5))
        .await
        .expect("store");

    // Re-seeding path: hand the collection back empty.
    historian
        .get_collection(
            &key(),
            &policy,
            GetCollectionOpts {
                should_create: true,
                should_truncate: true,
                ..GetCollectionOpts::default()
            },
        )
        .await
        .expect("truncate");

    let reply = historian
        .raw_data(&key(), &policy, &RawQuery::default())
        .await
        .expect("query");
    assert_eq!(reply.documents().map(<[_]>::len), Some(0));
}

#[tokio::test]
async fn test_drop_of_missing_collection_is_success() {
    let historian = historian();
    for is_aggregated in [false, true] {
        historian
            .drop_collection(&key(), &policy(DataModel::PerEntity), is_aggregated)
            .await
            .expect("drop of nonexistent collection");
    }
}

#[tokio::test]
async fn test_drop_removes_stored_data() {
    let historian = historian();
    let policy = policy(DataModel::PerEntity);
    let at = Utc.with_ymd_and_hms(2024, 3, 15, 10, 42, 37).unwrap();

    historian
        .store_raw_data(&key(), &policy, at, &AttrValue::Number(21.5))
        .await
        .expect("store");
    historian
        .drop_collection(&key(), &policy, false)
        .await
        .expect("drop");

    let result = historian.raw_data(&key(), &policy, &RawQuery::default()).await;
    assert!(matches!(result, Err(Error::CollectionNotFound(_))));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_close_releases_the_backend() {
    let historian = historian();
    historian.close().await.expect("close");
}
