//! Integration tests for identifier derivation and collision detection
//!
//! These tests exercise the naming path end to end through the public
//! `Historian` API:
//! - Raw and hashed collection names for all three data models
//! - Namespace-budget rejection when hashing is disabled
//! - Collision surfacing beside a still-usable handle

use std::sync::Arc;

use tidemark::backend::MemoryBackend;
use tidemark::naming::{self, codec};
use tidemark::{
    AttributeKey, Config, DataModel, Error, GetCollectionOpts, Historian, Resolution,
    StoragePolicy,
};

// ============================================================================
// Helper Functions
// ============================================================================

fn historian() -> Historian {
    Historian::with_backend(Arc::new(MemoryBackend::new()), Config::default())
}

fn policy(data_model: DataModel, hash_names: bool) -> StoragePolicy {
    StoragePolicy {
        data_model,
        hash_names,
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

fn very_long_key() -> AttributeKey {
    AttributeKey {
        service_path: "/a-service-path-segment".repeat(12),
        ..key()
    }
}

fn create_opts(should_store_hash: bool) -> GetCollectionOpts {
    GetCollectionOpts {
        should_create: true,
        is_aggregated: false,
        should_store_hash,
        should_truncate: false,
    }
}

// ============================================================================
// Name Derivation
// ============================================================================

#[tokio::test]
async fn test_raw_names_concatenate_folded_fields() {
    let historian = historian();
    let key = key();

    let name = historian
        .collection_name(&key, &policy(DataModel::PerServicePath, false), false)
        .expect("name");
    assert_eq!(name, "tm_/floor1");

    let name = historian
        .collection_name(&key, &policy(DataModel::PerEntity, false), false)
        .expect("name");
    assert_eq!(name, "tm_/floor1_press7_Machine");

    let name = historian
        .collection_name(&key, &policy(DataModel::PerAttribute, false), false)
        .expect("name");
    assert_eq!(name, "tm_/floor1_press7_Machine_temperature");

    // Aggregated names only differ by suffix.
    let aggregated = historian
        .collection_name(&key, &policy(DataModel::PerAttribute, false), true)
        .expect("name");
    assert_eq!(aggregated, format!("{name}.aggr"));
}

#[tokio::test]
async fn test_naming_is_deterministic_per_model_and_hash_state() {
    let historian = historian();
    for data_model in DataModel::ALL {
        for hash_names in [false, true] {
            let policy = policy(data_model, hash_names);
            let first = historian
                .collection_name(&key(), &policy, false)
                .expect("name");
            let second = historian
                .collection_name(&key(), &policy, false)
                .expect("name");
            assert_eq!(first, second, "{data_model} hashing={hash_names}");
        }
    }
}

#[tokio::test]
async fn test_long_key_rejected_unhashed_but_valid_hashed() {
    let historian = historian();
    for data_model in DataModel::ALL {
        let unhashed =
            historian.collection_name(&very_long_key(), &policy(data_model, false), false);
        assert!(
            matches!(unhashed, Err(Error::NameGeneration(_))),
            "{data_model} should overflow the namespace budget"
        );

        let hashed = historian
            .collection_name(&very_long_key(), &policy(data_model, true), false)
            .expect("hashed name");
        let database = historian.database_name(&very_long_key().service);
        assert!(database.len() + 1 + hashed.len() + ".aggr".len() <= 120);
    }
}

#[tokio::test]
async fn test_database_name_and_codec_round_trip() {
    let historian = historian();
    let database = historian.database_name("factory");
    assert_eq!(database, "tm_factory");

    // The rename-utility primitives recover the exact names.
    let encoded = codec::encode_database_name(&database);
    assert_eq!(codec::decode_database_name(&encoded), database);
    let collection = historian
        .collection_name(&key(), &policy(DataModel::PerEntity, false), true)
        .expect("name");
    let encoded = codec::encode_collection_name(&collection);
    assert_eq!(codec::decode_collection_name(&encoded), collection);
}

// ============================================================================
// Collision Detection
// ============================================================================

#[tokio::test]
async fn test_hash_collision_reported_beside_usable_handle() {
    let historian = historian();
    let policy = policy(DataModel::PerAttribute, true);

    // Two distinct logical keys whose folded bodies are identical: the
    // attribute type is not part of the name, but it is part of the
    // registered key, so the second registration collides.
    let first_key = key();
    let second_key = AttributeKey {
        attr_type: "Celsius".into(),
        ..key()
    };

    let access = historian
        .get_collection(&first_key, &policy, create_opts(true))
        .await
        .expect("first access");
    assert!(access.collision.is_none());

    let access = historian
        .get_collection(&second_key, &policy, create_opts(true))
        .await
        .expect("second access");
    let collision = access.collision.clone().expect("collision");
    assert_eq!(collision.attr_type.as_deref(), Some("Number"));

    // The handle is still usable despite the ambiguous name.
    assert_eq!(
        access.collection.collection,
        historian
            .collection_name(&second_key, &policy, false)
            .expect("name")
    );

    // Strict callers can turn the same outcome into the error kind.
    let err = access.strict().expect_err("collision as error");
    assert!(matches!(err, Error::HashCollision { .. }));
}

#[tokio::test]
async fn test_same_key_re_registration_is_not_a_collision() {
    let historian = historian();
    let policy = policy(DataModel::PerEntity, true);

    for _ in 0..2 {
        let access = historian
            .get_collection(&key(), &policy, create_opts(true))
            .await
            .expect("access");
        assert!(access.collision.is_none());
    }
}

#[tokio::test]
async fn test_hashed_name_length_tracks_database_budget() {
    let naming = tidemark::config::NamingConfig::default();
    let short_db = naming::database_name(&naming, "a");
    let long_db = naming::database_name(&naming, &"tenant".repeat(8));
    assert!(
        naming::hash_size_in_bytes(&naming, &long_db)
            < naming::hash_size_in_bytes(&naming, &short_db)
    );
}
