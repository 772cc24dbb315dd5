//! In-memory reference backend
//!
//! Mirrors the store semantics the engine relies on without a server: every
//! operation runs under one state lock, which gives it the same atomicity
//! the production backend gets from the store's update operators. Used by
//! the test suites and by embedders who want a store-free dry run.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::types::{
    AggregatedPoint, AttrValue, BucketDocument, BucketId, PointStats, RawEventDocument,
    RegistryEntry,
};

use super::{BucketFilter, DocumentBackend, Namespace, RawFilter, RegistryOutcome, SortOrder};

#[derive(Debug, Default)]
struct CollectionData {
    raw: Vec<RawEventDocument>,
    buckets: Vec<BucketDocument>,
    names: HashMap<String, RegistryEntry>,
}

#[derive(Debug, Default)]
struct MemoryState {
    databases: HashMap<String, HashMap<String, CollectionData>>,
}

impl MemoryState {
    fn collection(&self, ns: &Namespace) -> Option<&CollectionData> {
        self.databases.get(&ns.database)?.get(&ns.collection)
    }

    fn collection_mut(&mut self, ns: &Namespace) -> &mut CollectionData {
        self.databases
            .entry(ns.database.clone())
            .or_default()
            .entry(ns.collection.clone())
            .or_default()
    }
}

/// In-memory [`DocumentBackend`] implementation
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    fn backend_id(&self) -> &str {
        "memory"
    }

    async fn collection_exists(&self, ns: &Namespace) -> Result<bool, StoreError> {
        Ok(self.state.lock().collection(ns).is_some())
    }

    async fn ensure_collection(&self, ns: &Namespace) -> Result<(), StoreError> {
        self.state.lock().collection_mut(ns);
        Ok(())
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<(), StoreError> {
        // Dropping a collection that never existed is a no-op success.
        let mut state = self.state.lock();
        if let Some(collections) = state.databases.get_mut(&ns.database) {
            collections.remove(&ns.collection);
        }
        Ok(())
    }

    async fn truncate_collection(&self, ns: &Namespace) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(collections) = state.databases.get_mut(&ns.database) {
            if let Some(data) = collections.get_mut(&ns.collection) {
                data.raw.clear();
                data.buckets.clear();
                data.names.clear();
            }
        }
        Ok(())
    }

    async fn insert_raw(
        &self,
        ns: &Namespace,
        document: RawEventDocument,
    ) -> Result<(), StoreError> {
        self.state.lock().collection_mut(ns).raw.push(document);
        Ok(())
    }

    async fn find_raw(
        &self,
        ns: &Namespace,
        filter: &RawFilter,
        order: SortOrder,
        skip: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Vec<RawEventDocument>, StoreError> {
        let state = self.state.lock();
        let Some(data) = state.collection(ns) else {
            return Ok(Vec::new());
        };
        let mut matched: Vec<RawEventDocument> = data
            .raw
            .iter()
            .filter(|document| filter.matches(document))
            .cloned()
            .collect();
        match order {
            SortOrder::Ascending => matched.sort_by_key(|d| d.recv_time),
            SortOrder::Descending => {
                matched.sort_by_key(|d| std::cmp::Reverse(d.recv_time));
            }
        }
        let skip = skip.unwrap_or(0) as usize;
        let matched = matched.into_iter().skip(skip);
        Ok(match limit {
            Some(limit) => matched.take(limit as usize).collect(),
            None => matched.collect(),
        })
    }

    async fn seed_bucket(
        &self,
        ns: &Namespace,
        id: &BucketId,
        attr_type: &str,
        points: Vec<AggregatedPoint>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let data = state.collection_mut(ns);
        if data.buckets.iter().any(|bucket| &bucket.id == id) {
            return Ok(());
        }
        data.buckets.push(BucketDocument {
            id: id.clone(),
            attr_type: Some(attr_type.to_string()),
            points,
        });
        Ok(())
    }

    async fn accumulate(
        &self,
        ns: &Namespace,
        id: &BucketId,
        offset: u32,
        value: &AttrValue,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let data = state.collection_mut(ns);
        let point = data
            .buckets
            .iter_mut()
            .find(|bucket| &bucket.id == id)
            .and_then(|bucket| bucket.points.iter_mut().find(|p| p.offset == offset))
            .ok_or_else(|| StoreError::NotFound(format!("{ns} bucket point {offset}")))?;

        point.samples += 1;
        match (&mut point.stats, value) {
            (PointStats::Numeric { sum, sum2, min, max }, AttrValue::Number(v)) => {
                *sum += v;
                *sum2 += v * v;
                *min = min.min(*v);
                *max = max.max(*v);
            }
            (PointStats::Textual { occur }, AttrValue::Text(v)) => {
                *occur.entry(v.clone()).or_insert(0) += 1;
            }
            _ => {
                return Err(StoreError::Command(format!(
                    "value kind does not match the statistics accumulated at {ns} offset {offset}"
                )));
            }
        }
        Ok(())
    }

    async fn find_buckets(
        &self,
        ns: &Namespace,
        filter: &BucketFilter,
    ) -> Result<Vec<BucketDocument>, StoreError> {
        let state = self.state.lock();
        let Some(data) = state.collection(ns) else {
            return Ok(Vec::new());
        };
        let mut matched: Vec<BucketDocument> = data
            .buckets
            .iter()
            .filter(|bucket| filter.matches(&bucket.id))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            (a.id.resolution, a.id.origin).cmp(&(b.id.resolution, b.id.origin))
        });
        Ok(matched)
    }

    async fn bucket_point(
        &self,
        ns: &Namespace,
        id: &BucketId,
        offset: u32,
    ) -> Result<Option<AggregatedPoint>, StoreError> {
        let state = self.state.lock();
        Ok(state.collection(ns).and_then(|data| {
            data.buckets
                .iter()
                .find(|bucket| &bucket.id == id)
                .and_then(|bucket| bucket.points.iter().find(|p| p.offset == offset))
                .cloned()
        }))
    }

    async fn register_name(
        &self,
        ns: &Namespace,
        entry: RegistryEntry,
    ) -> Result<RegistryOutcome, StoreError> {
        let mut state = self.state.lock();
        let names = &mut state.collection_mut(ns).names;
        match names.get(&entry.id) {
            Some(existing) => Ok(RegistryOutcome::Existing(existing.clone())),
            None => {
                names.insert(entry.id.clone(), entry);
                Ok(RegistryOutcome::Registered)
            }
        }
    }

    async fn shutdown(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::types::DataModel;

    use super::*;

    fn ns() -> Namespace {
        Namespace::new("tm_factory", "tm_/floor1")
    }

    fn raw(at_secs: u32) -> RawEventDocument {
        RawEventDocument {
            recv_time: Utc.with_ymd_and_hms(2024, 3, 15, 10, 42, at_secs).unwrap(),
            entity_id: None,
            entity_type: None,
            attr_name: Some("temperature".into()),
            attr_type: "Number".into(),
            attr_value: AttrValue::Number(21.5),
        }
    }

    #[tokio::test]
    async fn test_drop_of_missing_collection_is_success() {
        let backend = MemoryBackend::new();
        backend.drop_collection(&ns()).await.expect("drop");
    }

    #[tokio::test]
    async fn test_find_raw_on_missing_collection_is_empty() {
        let backend = MemoryBackend::new();
        let docs = backend
            .find_raw(&ns(), &RawFilter::default(), SortOrder::Ascending, None, None)
            .await
            .expect("find");
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_find_raw_orders_and_paginates() {
        let backend = MemoryBackend::new();
        for s in [3, 1, 2, 0] {
            backend.insert_raw(&ns(), raw(s)).await.expect("insert");
        }

        let ascending = backend
            .find_raw(&ns(), &RawFilter::default(), SortOrder::Ascending, None, None)
            .await
            .expect("find");
        let seconds: Vec<u32> = ascending
            .iter()
            .map(|d| chrono::Timelike::second(&d.recv_time))
            .collect();
        assert_eq!(seconds, vec![0, 1, 2, 3]);

        let page = backend
            .find_raw(
                &ns(),
                &RawFilter::default(),
                SortOrder::Descending,
                Some(1),
                Some(2),
            )
            .await
            .expect("find");
        let seconds: Vec<u32> = page
            .iter()
            .map(|d| chrono::Timelike::second(&d.recv_time))
            .collect();
        assert_eq!(seconds, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_seed_is_idempotent_and_accumulate_updates_in_place() {
        let backend = MemoryBackend::new();
        let id = BucketId {
            entity_id: None,
            entity_type: None,
            attr_name: Some("temperature".into()),
            resolution: crate::types::Resolution::Minute,
            origin: Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap(),
        };
        let points = vec![AggregatedPoint {
            offset: 42,
            samples: 0,
            stats: PointStats::empty_numeric(),
        }];

        backend
            .seed_bucket(&ns(), &id, "Number", points.clone())
            .await
            .expect("seed");
        backend
            .accumulate(&ns(), &id, 42, &AttrValue::Number(10.0))
            .await
            .expect("accumulate");
        // A second seed must not reset the accumulated statistics.
        backend
            .seed_bucket(&ns(), &id, "Number", points)
            .await
            .expect("seed again");

        let point = backend
            .bucket_point(&ns(), &id, 42)
            .await
            .expect("read")
            .expect("point");
        assert_eq!(point.samples, 1);
        match point.stats {
            PointStats::Numeric { sum, min, max, .. } => {
                assert_eq!(sum, 10.0);
                assert_eq!(min, 10.0);
                assert_eq!(max, 10.0);
            }
            PointStats::Textual { .. } => panic!("expected numeric stats"),
        }
    }

    #[tokio::test]
    async fn test_register_name_returns_first_owner() {
        let backend = MemoryBackend::new();
        let registry = Namespace::new("tm_factory", "tm_collection_names");
        let key = crate::types::AttributeKey {
            service: "factory".into(),
            service_path: "/floor1".into(),
            entity_id: "press7".into(),
            entity_type: "Machine".into(),
            attr_name: "temperature".into(),
            attr_type: "Number".into(),
        };
        let entry = RegistryEntry::from_key("tm_abc123".into(), &key, DataModel::PerEntity, false);

        let first = backend
            .register_name(&registry, entry.clone())
            .await
            .expect("register");
        assert_eq!(first, RegistryOutcome::Registered);

        let second = backend
            .register_name(&registry, entry.clone())
            .await
            .expect("register");
        assert_eq!(second, RegistryOutcome::Existing(entry));
    }
}
