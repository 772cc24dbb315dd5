//! Physical identifier derivation
//!
//! Turns a logical key into database and collection identifiers under the
//! active data model, hashing long names into fixed-size digests when the
//! store's namespace budget would otherwise be exceeded. The codec submodule
//! holds the escape primitives consumed by external rename tooling.

pub mod codec;

use sha2::{Digest, Sha512};

use crate::config::NamingConfig;
use crate::error::NamingError;
use crate::types::{AttributeKey, DataModel};

/// Suffix distinguishing aggregated collections from raw ones
///
/// Appended after hashing: the digest is computed over the raw body only, so
/// the raw and aggregated collections of one key share a digest and differ by
/// suffix.
pub const AGGREGATED_SUFFIX: &str = ".aggr";

/// Floor for derived digest lengths, in bytes
///
/// Long database names shrink the digest but never below this, so collision
/// resistance stays bounded from below.
pub const MIN_HASH_BYTES: usize = 20;

/// Unprefixed name of the collision-registry collection
pub const REGISTRY_COLLECTION: &str = "collection_names";

/// Database identifier for a tenant: prefix + service
pub fn database_name(naming: &NamingConfig, service: &str) -> String {
    format!("{}{}", naming.database_prefix, service)
}

/// Prefixed name of the collision-registry collection
pub fn registry_collection_name(naming: &NamingConfig) -> String {
    format!("{}{}", naming.collection_prefix, REGISTRY_COLLECTION)
}

/// Digest length available after reserving room for the rest of the namespace
///
/// The namespace is `database.collection`; the digest gets whatever the
/// budget leaves after the database name, the collection prefix, the
/// aggregated suffix and the separating dot.
pub fn hash_size_in_bytes(naming: &NamingConfig, database_name: &str) -> usize {
    let reserved = database_name.len()
        + naming.collection_prefix.len()
        + AGGREGATED_SUFFIX.len()
        + ".".len();
    naming
        .max_namespace_bytes
        .saturating_sub(reserved)
        .max(MIN_HASH_BYTES)
}

/// Deterministic fixed-length digest of a raw identifier body
///
/// SHA-512 leaves 128 hex characters to truncate from, more than any
/// namespace budget leaves room for.
pub fn generate_hash(body: &str, size_in_bytes: usize) -> String {
    let digest = Sha512::digest(body.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(size_in_bytes);
    hex
}

/// Collection identifier for a logical key
///
/// The raw body is the `_`-joined concatenation of the key fields the data
/// model folds into the name. With hashing enabled the body is replaced by a
/// budget-sized digest; with hashing disabled a body that would overflow the
/// namespace budget is rejected outright.
pub fn collection_name(
    naming: &NamingConfig,
    key: &AttributeKey,
    data_model: DataModel,
    hash_names: bool,
    is_aggregated: bool,
) -> Result<String, NamingError> {
    let body = data_model.folded_fields(key).join("_");
    let suffix = if is_aggregated { AGGREGATED_SUFFIX } else { "" };
    let database = database_name(naming, &key.service);

    if hash_names {
        let size = hash_size_in_bytes(naming, &database);
        return Ok(format!(
            "{}{}{}",
            naming.collection_prefix,
            generate_hash(&body, size),
            suffix
        ));
    }

    let name = format!("{}{}{}", naming.collection_prefix, body, suffix);
    let namespace_length = database.len() + ".".len() + name.len();
    if namespace_length > naming.max_namespace_bytes {
        return Err(NamingError::NameTooLong {
            length: namespace_length,
            budget: naming.max_namespace_bytes,
        });
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn long_key() -> AttributeKey {
        AttributeKey {
            service_path: "/floor1".repeat(32),
            ..key()
        }
    }

    #[test]
    fn test_database_name_is_prefixed_service() {
        let naming = NamingConfig::default();
        assert_eq!(database_name(&naming, "factory"), "tm_factory");
    }

    #[test]
    fn test_collection_name_per_model() {
        let naming = NamingConfig::default();
        let name = collection_name(&naming, &key(), DataModel::PerServicePath, false, false)
            .expect("name");
        assert_eq!(name, "tm_/floor1");

        let name =
            collection_name(&naming, &key(), DataModel::PerEntity, false, false).expect("name");
        assert_eq!(name, "tm_/floor1_press7_Machine");

        let name =
            collection_name(&naming, &key(), DataModel::PerAttribute, false, true).expect("name");
        assert_eq!(name, "tm_/floor1_press7_Machine_temperature.aggr");
    }

    #[test]
    fn test_hash_is_deterministic_and_sized() {
        let digest = generate_hash("/floor1_press7", 24);
        assert_eq!(digest, generate_hash("/floor1_press7", 24));
        assert_eq!(digest.len(), 24);
        assert_ne!(digest, generate_hash("/floor2_press7", 24));
    }

    #[test]
    fn test_hash_size_shrinks_with_database_name() {
        let naming = NamingConfig::default();
        let short = hash_size_in_bytes(&naming, "tm_a");
        let long = hash_size_in_bytes(&naming, "tm_some_considerably_longer_tenant");
        assert!(long < short);
        assert!(long >= MIN_HASH_BYTES);
    }

    #[test]
    fn test_long_name_rejected_without_hashing() {
        let naming = NamingConfig::default();
        for model in DataModel::ALL {
            let err = collection_name(&naming, &long_key(), model, false, false);
            assert!(matches!(err, Err(NamingError::NameTooLong { .. })));
        }
    }

    #[test]
    fn test_long_name_hashes_to_fixed_length() {
        let naming = NamingConfig::default();
        let database = database_name(&naming, &long_key().service);
        let expected_len =
            naming.collection_prefix.len() + hash_size_in_bytes(&naming, &database);

        let raw = collection_name(&naming, &long_key(), DataModel::PerAttribute, true, false)
            .expect("hashed name");
        assert_eq!(raw.len(), expected_len);

        // Suffix is appended after hashing: same digest, `.aggr` tail.
        let aggregated =
            collection_name(&naming, &long_key(), DataModel::PerAttribute, true, true)
                .expect("hashed name");
        assert_eq!(aggregated, format!("{raw}{AGGREGATED_SUFFIX}"));
    }
}
