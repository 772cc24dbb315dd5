//! Pluggable document-store backends
//!
//! The engine talks to storage through the [`DocumentBackend`] trait; the
//! production implementation drives a MongoDB deployment, the in-memory one
//! backs tests and store-free dry runs. Every mutating operation a backend
//! exposes is atomic at the store level — the engine never reads, modifies
//! and writes back.

pub mod memory;
pub mod mongo;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::types::{
    AggregatedPoint, AttrValue, BucketDocument, BucketId, RawEventDocument, RegistryEntry,
    Resolution,
};

pub use memory::MemoryBackend;
pub use mongo::MongoBackend;

/// Fully qualified address of a physical collection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// Database identifier
    pub database: String,
    /// Collection identifier
    pub collection: String,
}

impl Namespace {
    /// Address a collection within a database
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Ordering of raw-event query results by reception time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest first
    Ascending,
    /// Newest first
    Descending,
}

/// Server-side filter over raw event documents
///
/// Key fields are matched by equality when present; the time bounds restrict
/// `recvTime` to `[from, to)`.
#[derive(Debug, Clone, Default)]
pub struct RawFilter {
    /// Match this entity identifier
    pub entity_id: Option<String>,
    /// Match this entity type
    pub entity_type: Option<String>,
    /// Match this attribute name
    pub attr_name: Option<String>,
    /// Lower reception-time bound (inclusive)
    pub from: Option<DateTime<Utc>>,
    /// Upper reception-time bound (exclusive)
    pub to: Option<DateTime<Utc>>,
}

impl RawFilter {
    pub(crate) fn matches(&self, document: &RawEventDocument) -> bool {
        if let Some(entity_id) = &self.entity_id {
            if document.entity_id.as_deref() != Some(entity_id) {
                return false;
            }
        }
        if let Some(entity_type) = &self.entity_type {
            if document.entity_type.as_deref() != Some(entity_type) {
                return false;
            }
        }
        if let Some(attr_name) = &self.attr_name {
            if document.attr_name.as_deref() != Some(attr_name) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if document.recv_time < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if document.recv_time >= to {
                return false;
            }
        }
        true
    }
}

/// Server-side filter over aggregation buckets
#[derive(Debug, Clone, Default)]
pub struct BucketFilter {
    /// Match this entity identifier in the bucket key
    pub entity_id: Option<String>,
    /// Match this entity type in the bucket key
    pub entity_type: Option<String>,
    /// Match this attribute name in the bucket key
    pub attr_name: Option<String>,
    /// Restrict to these resolutions
    pub resolutions: Vec<Resolution>,
    /// Lower bucket-origin bound (inclusive)
    pub from: Option<DateTime<Utc>>,
    /// Upper bucket-origin bound (exclusive)
    pub to: Option<DateTime<Utc>>,
}

impl BucketFilter {
    pub(crate) fn matches(&self, id: &BucketId) -> bool {
        if self.entity_id.is_some() && id.entity_id != self.entity_id {
            return false;
        }
        if self.entity_type.is_some() && id.entity_type != self.entity_type {
            return false;
        }
        if self.attr_name.is_some() && id.attr_name != self.attr_name {
            return false;
        }
        if !self.resolutions.contains(&id.resolution) {
            return false;
        }
        if let Some(from) = self.from {
            if id.origin < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if id.origin >= to {
                return false;
            }
        }
        true
    }
}

/// Outcome of an atomic collision-registry insertion
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryOutcome {
    /// The identifier was free and is now owned by the supplied entry
    Registered,
    /// The identifier was already registered; the stored entry is returned
    Existing(RegistryEntry),
}

/// Core trait for document-store backends
#[async_trait]
pub trait DocumentBackend: Send + Sync + 'static {
    /// Unique identifier for this backend
    fn backend_id(&self) -> &str;

    /// Whether the collection exists
    async fn collection_exists(&self, ns: &Namespace) -> Result<bool, StoreError>;

    /// Create the collection if it does not exist yet
    async fn ensure_collection(&self, ns: &Namespace) -> Result<(), StoreError>;

    /// Drop the collection; dropping a nonexistent collection is success
    async fn drop_collection(&self, ns: &Namespace) -> Result<(), StoreError>;

    /// Remove every document from the collection, keeping the collection
    async fn truncate_collection(&self, ns: &Namespace) -> Result<(), StoreError>;

    /// Append one raw event document
    async fn insert_raw(&self, ns: &Namespace, document: RawEventDocument)
        -> Result<(), StoreError>;

    /// Query raw event documents; querying an absent collection yields none
    async fn find_raw(
        &self,
        ns: &Namespace,
        filter: &RawFilter,
        order: SortOrder,
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Vec<RawEventDocument>, StoreError>;

    /// Insert the pre-populated point array for a bucket unless it exists
    ///
    /// Keyed on the bucket id and idempotent, so two concurrent first
    /// writers cannot clobber each other.
    async fn seed_bucket(
        &self,
        ns: &Namespace,
        id: &BucketId,
        attr_type: &str,
        points: Vec<AggregatedPoint>,
    ) -> Result<(), StoreError>;

    /// Atomically fold one observation into the point at `offset`
    ///
    /// Increments `samples` and either the numeric accumulators (sum, sum2,
    /// min-tighten, max-tighten) or the occurrence count of the textual
    /// value. A single store-level operation; concurrent callers never lose
    /// an increment.
    async fn accumulate(
        &self,
        ns: &Namespace,
        id: &BucketId,
        offset: u32,
        value: &AttrValue,
    ) -> Result<(), StoreError>;

    /// Query bucket documents; result order is backend-defined
    async fn find_buckets(
        &self,
        ns: &Namespace,
        filter: &BucketFilter,
    ) -> Result<Vec<BucketDocument>, StoreError>;

    /// Read the current statistics at one offset of one bucket
    async fn bucket_point(
        &self,
        ns: &Namespace,
        id: &BucketId,
        offset: u32,
    ) -> Result<Option<AggregatedPoint>, StoreError>;

    /// Atomically claim a hashed identifier or return its current owner
    async fn register_name(
        &self,
        ns: &Namespace,
        entry: RegistryEntry,
    ) -> Result<RegistryOutcome, StoreError>;

    /// Release the backend's resources
    async fn shutdown(&self) -> Result<(), StoreError>;
}
