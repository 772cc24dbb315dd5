//! Notification differ
//!
//! Classifies an incoming observation against the stored history of its key:
//! a brand-new key inserts, an identical reception time is a replayed
//! notification already applied, and anything else is an update — in which
//! case the differ also reports, per resolution, whether the candidate value
//! would tighten the currently tracked minimum. The minimum check reads the
//! aggregation engine's live bucket state; it never recomputes from raw
//! history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::aggregation;
use crate::backend::SortOrder;
use crate::engine::Historian;
use crate::error::{Error, Result};
use crate::types::{AttrValue, AttributeKey, NotificationInfo, PointStats, StoragePolicy};

impl Historian {
    /// Classify an observation as insert, replay or update
    pub async fn notification_info(
        &self,
        key: &AttributeKey,
        policy: &StoragePolicy,
        recv_time: DateTime<Utc>,
        value: &AttrValue,
    ) -> Result<NotificationInfo> {
        let raw_ns = self.namespace(key, policy, false)?;
        let filter = Self::key_filter(key, policy);
        let latest = self
            .backend()
            .find_raw(&raw_ns, &filter, SortOrder::Descending, None, Some(1))
            .await
            .map_err(Error::retrieval)?
            .into_iter()
            .next();

        let prior = match latest {
            None => return Ok(NotificationInfo::Inserts),
            Some(prior) if prior.recv_time == recv_time => {
                return Ok(NotificationInfo::Exists(prior));
            }
            Some(prior) => prior,
        };

        let aggregated_ns = self.namespace(key, policy, true)?;
        let mut new_min = BTreeMap::new();
        for &resolution in &policy.resolutions {
            let becomes_minimum = match value {
                AttrValue::Text(_) => false,
                AttrValue::Number(candidate) => {
                    let id = aggregation::bucket_id(key, policy.data_model, resolution, recv_time);
                    let offset = resolution.offset_of(recv_time);
                    let point = self
                        .backend()
                        .bucket_point(&aggregated_ns, &id, offset)
                        .await
                        .map_err(Error::retrieval)?;
                    match point {
                        // Nothing tracked at this slot yet: any value is a
                        // new minimum.
                        None => true,
                        Some(point) => match point.stats {
                            PointStats::Numeric { min, .. } => {
                                point.samples == 0 || *candidate < min
                            }
                            PointStats::Textual { .. } => false,
                        },
                    }
                }
            };
            new_min.insert(resolution, becomes_minimum);
        }

        Ok(NotificationInfo::Updates { prior, new_min })
    }
}
