//! The historian engine: connection lifecycle and collection access
//!
//! [`Historian`] is the process-wide handle. It owns the (lazily shared)
//! backend connection, resolves logical keys to physical collections through
//! the naming service, and hosts the ingestion, differ and retrieval
//! operations implemented in their own modules. Creation and teardown are
//! the only serialized lifecycle events; everything in between is plain
//! concurrent async I/O against the store.

mod builder;

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{DocumentBackend, MongoBackend, Namespace, RawFilter};
use crate::config::Config;
use crate::error::{Error, Result, StoreError};
use crate::naming;
use crate::registry;
use crate::types::{
    AttributeKey, CollectionAccess, GetCollectionOpts, RegistryEntry, StoragePolicy,
};

pub use builder::HistorianBuilder;

/// The historian: one handle per process, shared across calls
#[derive(Clone)]
pub struct Historian {
    backend: Arc<dyn DocumentBackend>,
    config: Config,
}

impl Historian {
    /// Start building a historian
    pub fn builder() -> HistorianBuilder {
        HistorianBuilder::new()
    }

    /// Connect to the store described by `config`
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let backend = MongoBackend::connect(&config.connection)
            .await
            .map_err(|err| match err {
                StoreError::Connection(message) => Error::Connection(message),
                other => Error::Connection(other.to_string()),
            })?;
        info!(uri = %config.connection.uri, "historian connected");
        Ok(Self::with_backend(Arc::new(backend), config))
    }

    /// Build a historian over an already constructed backend
    ///
    /// This is the seam the test suites use to run the full engine against
    /// the in-memory backend.
    pub fn with_backend(backend: Arc<dyn DocumentBackend>, config: Config) -> Self {
        Self { backend, config }
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn backend(&self) -> &dyn DocumentBackend {
        self.backend.as_ref()
    }

    /// Database identifier for a tenant
    pub fn database_name(&self, service: &str) -> String {
        naming::database_name(&self.config.naming, service)
    }

    /// Collection identifier for a logical key under a policy
    pub fn collection_name(
        &self,
        key: &AttributeKey,
        policy: &StoragePolicy,
        is_aggregated: bool,
    ) -> Result<String> {
        Ok(naming::collection_name(
            &self.config.naming,
            key,
            policy.data_model,
            policy.hash_names,
            is_aggregated,
        )?)
    }

    pub(crate) fn namespace(
        &self,
        key: &AttributeKey,
        policy: &StoragePolicy,
        is_aggregated: bool,
    ) -> Result<Namespace> {
        Ok(Namespace::new(
            self.database_name(&key.service),
            self.collection_name(key, policy, is_aggregated)?,
        ))
    }

    pub(crate) fn registry_namespace(&self, service: &str) -> Namespace {
        Namespace::new(
            self.database_name(service),
            naming::registry_collection_name(&self.config.naming),
        )
    }

    /// Server-side filter matching the document-kept suffix of a key
    pub(crate) fn key_filter(key: &AttributeKey, policy: &StoragePolicy) -> RawFilter {
        let (entity_id, entity_type, attr_name) = policy.data_model.document_fields(key);
        RawFilter {
            entity_id,
            entity_type,
            attr_name,
            from: None,
            to: None,
        }
    }

    /// Resolve (and optionally create) the physical collection for a key
    ///
    /// With `should_create` off, a missing collection is reported as
    /// [`Error::CollectionNotFound`] and nothing is created — read-only
    /// callers never silently leave state behind. With `should_store_hash`
    /// on and hashing active, the hashed name is registered and any
    /// collision travels back beside the usable handle.
    pub async fn get_collection(
        &self,
        key: &AttributeKey,
        policy: &StoragePolicy,
        opts: GetCollectionOpts,
    ) -> Result<CollectionAccess> {
        let ns = self.namespace(key, policy, opts.is_aggregated)?;

        let exists = self
            .backend
            .collection_exists(&ns)
            .await
            .map_err(Error::retrieval)?;
        if !exists {
            if !opts.should_create {
                return Err(Error::CollectionNotFound(ns.to_string()));
            }
            self.backend
                .ensure_collection(&ns)
                .await
                .map_err(Error::write)?;
            debug!(namespace = %ns, "collection created");
        }

        if opts.should_truncate {
            self.backend
                .truncate_collection(&ns)
                .await
                .map_err(Error::write)?;
            debug!(namespace = %ns, "collection truncated");
        }

        let collision = if opts.should_store_hash && policy.hash_names {
            let entry = RegistryEntry::from_key(
                ns.collection.clone(),
                key,
                policy.data_model,
                opts.is_aggregated,
            );
            registry::record_or_verify(
                self.backend.as_ref(),
                &self.registry_namespace(&key.service),
                entry,
            )
            .await?
        } else {
            None
        };

        Ok(CollectionAccess {
            collection: ns,
            collision,
        })
    }

    /// Drop the physical collection for a key; absent collections are a
    /// no-op success
    pub async fn drop_collection(
        &self,
        key: &AttributeKey,
        policy: &StoragePolicy,
        is_aggregated: bool,
    ) -> Result<()> {
        let ns = self.namespace(key, policy, is_aggregated)?;
        self.backend
            .drop_collection(&ns)
            .await
            .map_err(Error::write)?;
        debug!(namespace = %ns, "collection dropped");
        Ok(())
    }

    /// Tear the connection down; connect before first use, close after last
    pub async fn close(self) -> Result<()> {
        self.backend
            .shutdown()
            .await
            .map_err(|err| Error::Connection(err.to_string()))?;
        info!("historian closed");
        Ok(())
    }
}

impl CollectionAccess {
    /// Treat a collision as the error kind it maps to
    ///
    /// For callers that would rather fail than keep a name two keys claim;
    /// the default contract hands both the handle and the collision back.
    pub fn strict(self) -> Result<Namespace> {
        match self.collision {
            None => Ok(self.collection),
            Some(existing) => Err(Error::HashCollision {
                identifier: self.collection.collection.clone(),
                existing: Box::new(existing),
            }),
        }
    }
}
