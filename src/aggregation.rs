//! Rollup-bucket maintenance
//!
//! Every ingested observation lands twice: once as an immutable raw event
//! document and once folded into one bucket per configured resolution. A
//! bucket is seeded with its full sparse point array on first contact (a
//! keyed, idempotent upsert), after which each observation is one atomic
//! positional increment — two writers racing on the same offset both land.
//!
//! Re-storing an identical raw event double-counts its bucket contribution;
//! replay detection is the caller's job via the notification differ.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::engine::Historian;
use crate::error::{Error, Result};
use crate::metrics;
use crate::types::{
    AggregatedPoint, AttrValue, AttributeKey, BucketId, DataModel, PointStats, RawEventDocument,
    Resolution, StoragePolicy,
};

/// The bucket addressed by an observation at `at`, under a data model
pub(crate) fn bucket_id(
    key: &AttributeKey,
    data_model: DataModel,
    resolution: Resolution,
    at: DateTime<Utc>,
) -> BucketId {
    let (entity_id, entity_type, attr_name) = data_model.document_fields(key);
    BucketId {
        entity_id,
        entity_type,
        attr_name,
        resolution,
        origin: resolution.origin(at),
    }
}

/// The zeroed point array a fresh bucket is seeded with
///
/// One entry per possible offset of the resolution; the statistics shape
/// follows the declared value kind.
pub(crate) fn prepopulated_points(resolution: Resolution, value: &AttrValue) -> Vec<AggregatedPoint> {
    let stats = if value.is_numeric() {
        PointStats::empty_numeric()
    } else {
        PointStats::empty_textual()
    };
    resolution
        .offsets()
        .map(|offset| AggregatedPoint {
            offset,
            samples: 0,
            stats: stats.clone(),
        })
        .collect()
}

impl Historian {
    /// Persist one observation as a raw event document
    ///
    /// A pure insert: no read-before-write, and the document is never
    /// updated afterwards.
    pub async fn store_raw_data(
        &self,
        key: &AttributeKey,
        policy: &StoragePolicy,
        recv_time: DateTime<Utc>,
        value: &AttrValue,
    ) -> Result<()> {
        let ns = self.namespace(key, policy, false)?;
        let (entity_id, entity_type, attr_name) = policy.data_model.document_fields(key);
        let document = RawEventDocument {
            recv_time,
            entity_id,
            entity_type,
            attr_name,
            attr_type: key.attr_type.clone(),
            attr_value: value.clone(),
        };
        self.backend()
            .insert_raw(&ns, document)
            .await
            .map_err(Error::write)?;
        metrics::EVENTS_STORED_TOTAL
            .with_label_values(&[policy.data_model.as_str()])
            .inc();
        Ok(())
    }

    /// Fold one observation into the rollup buckets of every configured
    /// resolution
    pub async fn store_aggregated_data(
        &self,
        key: &AttributeKey,
        policy: &StoragePolicy,
        recv_time: DateTime<Utc>,
        value: &AttrValue,
    ) -> Result<()> {
        let ns = self.namespace(key, policy, true)?;
        for &resolution in &policy.resolutions {
            let id = bucket_id(key, policy.data_model, resolution, recv_time);
            let offset = resolution.offset_of(recv_time);

            self.backend()
                .seed_bucket(&ns, &id, &key.attr_type, prepopulated_points(resolution, value))
                .await
                .map_err(Error::write)?;
            self.backend()
                .accumulate(&ns, &id, offset, value)
                .await
                .map_err(Error::write)?;

            metrics::BUCKET_UPDATES_TOTAL
                .with_label_values(&[resolution.as_str()])
                .inc();
        }
        debug!(
            namespace = %ns,
            resolutions = policy.resolutions.len(),
            "observation aggregated"
        );
        Ok(())
    }
}
