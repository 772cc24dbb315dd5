//! Raw and aggregated retrieval
//!
//! Both paths resolve the collection in strict mode first, so a read against
//! a key that never stored anything fails with the dedicated not-found kind
//! instead of silently creating state. Zero matches inside an existing
//! collection is an empty result, never an error.

use csv::WriterBuilder;

use crate::backend::{BucketFilter, SortOrder};
use crate::engine::Historian;
use crate::error::{Error, Result};
use crate::metrics;
use crate::types::{
    AggregateFunction, AggregatedPoint, AggregatedQuery, AttributeKey, BucketProjection,
    GetCollectionOpts, PointStats, ProjectedPoint, RawDataReply, RawEventDocument, RawQuery,
    StoragePolicy,
};

impl Historian {
    /// Retrieve raw event documents for a key
    ///
    /// Pagination: `last_n` returns the most recent N (fetched descending,
    /// re-ordered ascending); `h_limit`/`h_offset` page over ascending
    /// reception time; with neither, the whole filtered set comes back.
    pub async fn raw_data(
        &self,
        key: &AttributeKey,
        policy: &StoragePolicy,
        query: &RawQuery,
    ) -> Result<RawDataReply> {
        let access = self
            .get_collection(
                key,
                policy,
                GetCollectionOpts {
                    is_aggregated: false,
                    ..GetCollectionOpts::default()
                },
            )
            .await?;

        let mut filter = Self::key_filter(key, policy);
        filter.from = query.from;
        filter.to = query.to;

        let documents = if let Some(last_n) = query.last_n {
            let mut documents = self
                .backend()
                .find_raw(
                    &access.collection,
                    &filter,
                    SortOrder::Descending,
                    None,
                    Some(last_n),
                )
                .await
                .map_err(Error::retrieval)?;
            documents.reverse();
            documents
        } else {
            self.backend()
                .find_raw(
                    &access.collection,
                    &filter,
                    SortOrder::Ascending,
                    query.h_offset,
                    query.h_limit,
                )
                .await
                .map_err(Error::retrieval)?
        };

        metrics::RETRIEVALS_TOTAL.with_label_values(&["raw"]).inc();

        let wants_csv = query
            .filetype
            .as_deref()
            .is_some_and(|filetype| filetype.eq_ignore_ascii_case("csv"));
        if wants_csv {
            Ok(RawDataReply::Csv(render_csv(&documents)?))
        } else {
            Ok(RawDataReply::Documents(documents))
        }
    }

    /// Retrieve bucket projections for a key
    ///
    /// Without a resolution the reply carries one projection per configured
    /// resolution; a resolution outside the configured set fails fast. Date
    /// bounds restrict bucket origins to `[from, to)`, and the aggregated
    /// function narrows each point to the requested statistic.
    pub async fn aggregated_data(
        &self,
        key: &AttributeKey,
        policy: &StoragePolicy,
        query: &AggregatedQuery,
    ) -> Result<Vec<BucketProjection>> {
        let resolutions = match query.resolution {
            Some(resolution) if policy.resolutions.contains(&resolution) => vec![resolution],
            Some(resolution) => {
                return Err(Error::InvalidResolution(format!(
                    "{resolution} is not in the configured resolution set"
                )));
            }
            None => policy.resolutions.clone(),
        };

        let access = self
            .get_collection(
                key,
                policy,
                GetCollectionOpts {
                    is_aggregated: true,
                    ..GetCollectionOpts::default()
                },
            )
            .await?;

        let key_filter = Self::key_filter(key, policy);
        let filter = BucketFilter {
            entity_id: key_filter.entity_id,
            entity_type: key_filter.entity_type,
            attr_name: key_filter.attr_name,
            resolutions,
            from: query.from,
            to: query.to,
        };
        let mut buckets = self
            .backend()
            .find_buckets(&access.collection, &filter)
            .await
            .map_err(Error::retrieval)?;
        buckets.sort_by(|a, b| (a.id.resolution, a.id.origin).cmp(&(b.id.resolution, b.id.origin)));

        metrics::RETRIEVALS_TOTAL
            .with_label_values(&["aggregated"])
            .inc();

        Ok(buckets
            .into_iter()
            .map(|bucket| BucketProjection {
                id: bucket.id,
                attr_type: bucket.attr_type,
                points: bucket
                    .points
                    .iter()
                    .filter(|point| point.samples > 0)
                    .map(|point| project_point(point, query.aggregated_function))
                    .collect(),
            })
            .collect())
    }
}

/// Narrow one point to the requested statistic(s)
fn project_point(point: &AggregatedPoint, function: Option<AggregateFunction>) -> ProjectedPoint {
    let (sum, sum2, min, max, occur) = match &point.stats {
        PointStats::Numeric { sum, sum2, min, max } => {
            (Some(*sum), Some(*sum2), Some(*min), Some(*max), None)
        }
        PointStats::Textual { occur } => (None, None, None, None, Some(occur.clone())),
    };
    let mut projected = ProjectedPoint {
        offset: point.offset,
        samples: point.samples,
        sum: None,
        sum2: None,
        min: None,
        max: None,
        occur: None,
    };
    match function {
        None => {
            projected.sum = sum;
            projected.sum2 = sum2;
            projected.min = min;
            projected.max = max;
            projected.occur = occur;
        }
        Some(AggregateFunction::Sum) => projected.sum = sum,
        Some(AggregateFunction::Sum2) => projected.sum2 = sum2,
        Some(AggregateFunction::Min) => projected.min = min,
        Some(AggregateFunction::Max) => projected.max = max,
        Some(AggregateFunction::Occur) => projected.occur = occur,
    }
    projected
}

/// Render raw event documents as one CSV payload
fn render_csv(documents: &[RawEventDocument]) -> Result<String> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(["attrName", "attrType", "attrValue", "recvTime"])
        .map_err(|e| Error::Retrieval(format!("csv rendering failed: {e}")))?;
    for document in documents {
        writer
            .write_record([
                document.attr_name.as_deref().unwrap_or(""),
                &document.attr_type,
                &document.attr_value.to_string(),
                &document.recv_time.to_rfc3339(),
            ])
            .map_err(|e| Error::Retrieval(format!("csv rendering failed: {e}")))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Retrieval(format!("csv rendering failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| Error::Retrieval(format!("csv rendering failed: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};

    use crate::types::AttrValue;

    use super::*;

    #[test]
    fn test_project_point_narrows_to_requested_statistic() {
        let point = AggregatedPoint {
            offset: 5,
            samples: 3,
            stats: PointStats::Numeric {
                sum: 30.0,
                sum2: 300.0,
                min: 5.0,
                max: 15.0,
            },
        };

        let projected = project_point(&point, Some(AggregateFunction::Sum));
        assert_eq!(projected.sum, Some(30.0));
        assert!(projected.sum2.is_none() && projected.min.is_none() && projected.max.is_none());

        let projected = project_point(&point, None);
        assert_eq!(projected.sum2, Some(300.0));
        assert_eq!(projected.min, Some(5.0));
        assert_eq!(projected.max, Some(15.0));
        assert!(projected.occur.is_none());
    }

    #[test]
    fn test_project_point_occur() {
        let mut occur = BTreeMap::new();
        occur.insert("open".to_string(), 2);
        let point = AggregatedPoint {
            offset: 5,
            samples: 2,
            stats: PointStats::Textual { occur: occur.clone() },
        };
        let projected = project_point(&point, Some(AggregateFunction::Occur));
        assert_eq!(projected.occur, Some(occur));
        assert!(projected.sum.is_none());
    }

    #[test]
    fn test_render_csv_shape() {
        let documents = vec![RawEventDocument {
            recv_time: Utc.with_ymd_and_hms(2024, 3, 15, 10, 42, 37).unwrap(),
            entity_id: None,
            entity_type: None,
            attr_name: Some("temperature".into()),
            attr_type: "Number".into(),
            attr_value: AttrValue::Number(21.5),
        }];
        let csv = render_csv(&documents).expect("render");
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("attrName,attrType,attrValue,recvTime"));
        let row = lines.next().expect("data row");
        assert!(row.starts_with("temperature,Number,21.5,2024-03-15T10:42:37"));
        assert_eq!(lines.next(), None);
    }
}
