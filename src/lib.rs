//! Tidemark - short-term telemetry historian over a document store
//!
//! This library persists time-stamped attribute observations from
//! IoT/telemetry sources and maintains pre-computed statistical rollups at
//! second/minute/hour/day/month resolution, so summary queries never scan
//! raw history:
//! - Three collection-sharding granularities (per service path, per entity,
//!   per attribute), with optional fixed-size name hashing and collision
//!   detection
//! - Lose-free concurrent rollup maintenance via atomic store-level updates
//! - An insert/update/replay differ that also surfaces new minima
//! - Raw and aggregated retrieval with pagination, date filtering and CSV
//!   output
//!
//! The engine talks to storage through a pluggable backend: MongoDB in
//! production, an in-memory implementation for tests and dry runs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod naming;
pub mod registry;
pub mod types;

/// Prometheus counters and telemetry
pub mod metrics;

mod aggregation;
mod notify;
mod retrieval;

// Re-export main types
pub use config::Config;
pub use engine::{Historian, HistorianBuilder};
pub use error::{Error, Result};
pub use types::{
    AggregateFunction, AggregatedQuery, AttrValue, AttributeKey, BucketProjection,
    CollectionAccess, DataModel, GetCollectionOpts, NotificationInfo, RawDataReply, RawQuery,
    Resolution, StoragePolicy,
};
