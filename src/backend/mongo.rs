//! MongoDB backend
//!
//! Maps the backend contract onto the wire documents described in the data
//! model: raw events, pre-populated aggregation buckets mutated with
//! positional update operators, and the collision registry driven by a
//! single find-and-modify per registration. Connection pooling is the
//! client's; pool size, auth and replica-set topology pass straight through.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{
    ClientOptions, Credential, FindOneAndUpdateOptions, FindOptions, ReturnDocument,
    UpdateOptions,
};
use mongodb::{Client, Collection};
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::error::StoreError;
use crate::naming::codec;
use crate::types::{
    AggregatedPoint, AttrValue, BucketDocument, BucketId, PointStats, RawEventDocument,
    RegistryEntry, Resolution,
};

use super::{BucketFilter, DocumentBackend, Namespace, RawFilter, RegistryOutcome, SortOrder};

const NAMESPACE_NOT_FOUND: i32 = 26;
const NAMESPACE_EXISTS: i32 = 48;
const DUPLICATE_KEY: i32 = 11000;

/// MongoDB-backed [`DocumentBackend`] implementation
#[derive(Debug, Clone)]
pub struct MongoBackend {
    client: Client,
}

impl MongoBackend {
    /// Connect to the deployment described by the connection configuration
    ///
    /// The endpoint is probed with a ping so an unreachable host or refused
    /// port surfaces here, with the offending endpoint in the message,
    /// rather than on the first operation.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, StoreError> {
        let uri = &config.uri;
        let mut options = ClientOptions::parse(uri).await.map_err(|e| {
            StoreError::Connection(format!("failed to connect to server [{uri}]: {e}"))
        })?;
        options.max_pool_size = Some(config.pool_size);
        options.repl_set_name = config.replica_set.clone();
        options.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
        options.server_selection_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            let mut credential = Credential::builder()
                .username(username.clone())
                .password(password.clone())
                .build();
            credential.source = config.auth_source.clone();
            options.credential = Some(credential);
        }

        let client = Client::with_options(options).map_err(|e| {
            StoreError::Connection(format!("failed to connect to server [{uri}]: {e}"))
        })?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                StoreError::Connection(format!("failed to connect to server [{uri}]: {e}"))
            })?;

        debug!(uri = %uri, pool_size = config.pool_size, "store connection established");
        Ok(Self { client })
    }

    fn collection(&self, ns: &Namespace) -> Collection<Document> {
        self.client
            .database(&ns.database)
            .collection::<Document>(&ns.collection)
    }
}

fn command_code(err: &mongodb::error::Error) -> Option<i32> {
    match &*err.kind {
        mongodb::error::ErrorKind::Command(command) => Some(command.code),
        _ => None,
    }
}

fn store_err(err: mongodb::error::Error) -> StoreError {
    match &*err.kind {
        mongodb::error::ErrorKind::Io(_) | mongodb::error::ErrorKind::ServerSelection { .. } => {
            StoreError::Connection(err.to_string())
        }
        _ => StoreError::Command(err.to_string()),
    }
}

// ============================================================================
// Document mapping
// ============================================================================

fn value_to_bson(value: &AttrValue) -> Bson {
    match value {
        AttrValue::Number(n) => Bson::Double(*n),
        AttrValue::Text(s) => Bson::String(s.clone()),
    }
}

fn bson_to_value(bson: &Bson) -> Result<AttrValue, StoreError> {
    match bson {
        Bson::Double(n) => Ok(AttrValue::Number(*n)),
        Bson::Int32(n) => Ok(AttrValue::Number(f64::from(*n))),
        Bson::Int64(n) => Ok(AttrValue::Number(*n as f64)),
        Bson::String(s) => Ok(AttrValue::Text(s.clone())),
        other => Err(StoreError::Decode(format!(
            "unsupported attrValue shape: {other:?}"
        ))),
    }
}

fn bson_to_u64(bson: &Bson) -> Result<u64, StoreError> {
    match bson {
        Bson::Int32(n) => Ok(*n as u64),
        Bson::Int64(n) => Ok(*n as u64),
        Bson::Double(n) => Ok(*n as u64),
        other => Err(StoreError::Decode(format!("expected integer, got {other:?}"))),
    }
}

fn bson_to_f64(bson: &Bson) -> Result<f64, StoreError> {
    match bson {
        Bson::Double(n) => Ok(*n),
        Bson::Int32(n) => Ok(f64::from(*n)),
        Bson::Int64(n) => Ok(*n as f64),
        other => Err(StoreError::Decode(format!("expected number, got {other:?}"))),
    }
}

fn raw_to_doc(document: &RawEventDocument) -> Document {
    let mut doc = doc! {
        "recvTime": mongodb::bson::DateTime::from_chrono(document.recv_time),
    };
    if let Some(entity_id) = &document.entity_id {
        doc.insert("entityId", entity_id.as_str());
    }
    if let Some(entity_type) = &document.entity_type {
        doc.insert("entityType", entity_type.as_str());
    }
    if let Some(attr_name) = &document.attr_name {
        doc.insert("attrName", attr_name.as_str());
    }
    doc.insert("attrType", document.attr_type.as_str());
    doc.insert("attrValue", value_to_bson(&document.attr_value));
    doc
}

fn doc_to_raw(doc: &Document) -> Result<RawEventDocument, StoreError> {
    let recv_time = doc
        .get_datetime("recvTime")
        .map_err(|e| StoreError::Decode(format!("recvTime: {e}")))?
        .to_chrono();
    let attr_type = doc
        .get_str("attrType")
        .map_err(|e| StoreError::Decode(format!("attrType: {e}")))?
        .to_string();
    let attr_value = doc
        .get("attrValue")
        .ok_or_else(|| StoreError::Decode("attrValue missing".into()))
        .and_then(bson_to_value)?;
    Ok(RawEventDocument {
        recv_time,
        entity_id: doc.get_str("entityId").ok().map(str::to_string),
        entity_type: doc.get_str("entityType").ok().map(str::to_string),
        attr_name: doc.get_str("attrName").ok().map(str::to_string),
        attr_type,
        attr_value,
    })
}

fn bucket_id_doc(id: &BucketId) -> Document {
    let mut doc = Document::new();
    if let Some(entity_id) = &id.entity_id {
        doc.insert("entityId", entity_id.as_str());
    }
    if let Some(entity_type) = &id.entity_type {
        doc.insert("entityType", entity_type.as_str());
    }
    if let Some(attr_name) = &id.attr_name {
        doc.insert("attrName", attr_name.as_str());
    }
    doc.insert("resolution", id.resolution.as_str());
    doc.insert("origin", mongodb::bson::DateTime::from_chrono(id.origin));
    doc
}

fn doc_to_bucket_id(doc: &Document) -> Result<BucketId, StoreError> {
    let resolution: Resolution = doc
        .get_str("resolution")
        .map_err(|e| StoreError::Decode(format!("_id.resolution: {e}")))?
        .parse()
        .map_err(|e| StoreError::Decode(format!("_id.resolution: {e}")))?;
    let origin = doc
        .get_datetime("origin")
        .map_err(|e| StoreError::Decode(format!("_id.origin: {e}")))?
        .to_chrono();
    Ok(BucketId {
        entity_id: doc.get_str("entityId").ok().map(str::to_string),
        entity_type: doc.get_str("entityType").ok().map(str::to_string),
        attr_name: doc.get_str("attrName").ok().map(str::to_string),
        resolution,
        origin,
    })
}

fn point_to_doc(point: &AggregatedPoint) -> Document {
    let mut doc = doc! {
        "offset": point.offset as i64,
        "samples": point.samples as i64,
    };
    match &point.stats {
        PointStats::Numeric { sum, sum2, min, max } => {
            doc.insert("sum", *sum);
            doc.insert("sum2", *sum2);
            doc.insert("min", *min);
            doc.insert("max", *max);
        }
        PointStats::Textual { occur } => {
            let mut occur_doc = Document::new();
            for (value, count) in occur {
                occur_doc.insert(codec::encode_field_name(value), *count as i64);
            }
            doc.insert("occur", occur_doc);
        }
    }
    doc
}

fn doc_to_point(doc: &Document) -> Result<AggregatedPoint, StoreError> {
    let offset = doc
        .get("offset")
        .ok_or_else(|| StoreError::Decode("points.offset missing".into()))
        .and_then(bson_to_u64)? as u32;
    let samples = doc
        .get("samples")
        .ok_or_else(|| StoreError::Decode("points.samples missing".into()))
        .and_then(bson_to_u64)?;
    let stats = if let Ok(occur_doc) = doc.get_document("occur") {
        let mut occur = std::collections::BTreeMap::new();
        for (value, count) in occur_doc {
            occur.insert(codec::decode_field_name(value), bson_to_u64(count)?);
        }
        PointStats::Textual { occur }
    } else {
        PointStats::Numeric {
            sum: doc.get("sum").map_or(Ok(0.0), bson_to_f64)?,
            sum2: doc.get("sum2").map_or(Ok(0.0), bson_to_f64)?,
            min: doc.get("min").map_or(Ok(f64::INFINITY), bson_to_f64)?,
            max: doc.get("max").map_or(Ok(f64::NEG_INFINITY), bson_to_f64)?,
        }
    };
    Ok(AggregatedPoint {
        offset,
        samples,
        stats,
    })
}

fn doc_to_bucket(doc: &Document) -> Result<BucketDocument, StoreError> {
    let id = doc
        .get_document("_id")
        .map_err(|e| StoreError::Decode(format!("_id: {e}")))
        .and_then(doc_to_bucket_id)?;
    let points = doc
        .get_array("points")
        .map_err(|e| StoreError::Decode(format!("points: {e}")))?
        .iter()
        .map(|entry| match entry {
            Bson::Document(point) => doc_to_point(point),
            other => Err(StoreError::Decode(format!(
                "points entry is not a document: {other:?}"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BucketDocument {
        id,
        attr_type: doc.get_str("attrType").ok().map(str::to_string),
        points,
    })
}

fn entry_to_doc(entry: &RegistryEntry) -> Document {
    let mut doc = doc! {
        "dataModel": entry.data_model.as_str(),
        "isAggregated": entry.is_aggregated,
        "service": entry.service.as_str(),
        "servicePath": entry.service_path.as_str(),
    };
    if let Some(entity_id) = &entry.entity_id {
        doc.insert("entityId", entity_id.as_str());
    }
    if let Some(entity_type) = &entry.entity_type {
        doc.insert("entityType", entity_type.as_str());
    }
    if let Some(attr_name) = &entry.attr_name {
        doc.insert("attrName", attr_name.as_str());
    }
    if let Some(attr_type) = &entry.attr_type {
        doc.insert("attrType", attr_type.as_str());
    }
    doc
}

fn doc_to_entry(doc: &Document) -> Result<RegistryEntry, StoreError> {
    let data_model = doc
        .get_str("dataModel")
        .map_err(|e| StoreError::Decode(format!("dataModel: {e}")))?
        .parse()
        .map_err(|e| StoreError::Decode(format!("dataModel: {e}")))?;
    Ok(RegistryEntry {
        id: doc
            .get_str("_id")
            .map_err(|e| StoreError::Decode(format!("_id: {e}")))?
            .to_string(),
        data_model,
        is_aggregated: doc
            .get_bool("isAggregated")
            .map_err(|e| StoreError::Decode(format!("isAggregated: {e}")))?,
        service: doc
            .get_str("service")
            .map_err(|e| StoreError::Decode(format!("service: {e}")))?
            .to_string(),
        service_path: doc
            .get_str("servicePath")
            .map_err(|e| StoreError::Decode(format!("servicePath: {e}")))?
            .to_string(),
        entity_id: doc.get_str("entityId").ok().map(str::to_string),
        entity_type: doc.get_str("entityType").ok().map(str::to_string),
        attr_name: doc.get_str("attrName").ok().map(str::to_string),
        attr_type: doc.get_str("attrType").ok().map(str::to_string),
    })
}

fn raw_filter_doc(filter: &RawFilter) -> Document {
    let mut doc = Document::new();
    if let Some(entity_id) = &filter.entity_id {
        doc.insert("entityId", entity_id.as_str());
    }
    if let Some(entity_type) = &filter.entity_type {
        doc.insert("entityType", entity_type.as_str());
    }
    if let Some(attr_name) = &filter.attr_name {
        doc.insert("attrName", attr_name.as_str());
    }
    let mut range = Document::new();
    if let Some(from) = filter.from {
        range.insert("$gte", mongodb::bson::DateTime::from_chrono(from));
    }
    if let Some(to) = filter.to {
        range.insert("$lt", mongodb::bson::DateTime::from_chrono(to));
    }
    if !range.is_empty() {
        doc.insert("recvTime", range);
    }
    doc
}

fn bucket_filter_doc(filter: &BucketFilter) -> Document {
    let mut doc = Document::new();
    if let Some(entity_id) = &filter.entity_id {
        doc.insert("_id.entityId", entity_id.as_str());
    }
    if let Some(entity_type) = &filter.entity_type {
        doc.insert("_id.entityType", entity_type.as_str());
    }
    if let Some(attr_name) = &filter.attr_name {
        doc.insert("_id.attrName", attr_name.as_str());
    }
    let resolutions: Vec<Bson> = filter
        .resolutions
        .iter()
        .map(|r| Bson::String(r.as_str().to_string()))
        .collect();
    doc.insert("_id.resolution", doc! { "$in": resolutions });
    let mut range = Document::new();
    if let Some(from) = filter.from {
        range.insert("$gte", mongodb::bson::DateTime::from_chrono(from));
    }
    if let Some(to) = filter.to {
        range.insert("$lt", mongodb::bson::DateTime::from_chrono(to));
    }
    if !range.is_empty() {
        doc.insert("_id.origin", range);
    }
    doc
}

// ============================================================================
// Backend implementation
// ============================================================================

#[async_trait]
impl DocumentBackend for MongoBackend {
    fn backend_id(&self) -> &str {
        "mongodb"
    }

    async fn collection_exists(&self, ns: &Namespace) -> Result<bool, StoreError> {
        let names = self
            .client
            .database(&ns.database)
            .list_collection_names(doc! { "name": ns.collection.as_str() })
            .await
            .map_err(store_err)?;
        Ok(!names.is_empty())
    }

    async fn ensure_collection(&self, ns: &Namespace) -> Result<(), StoreError> {
        match self
            .client
            .database(&ns.database)
            .create_collection(&ns.collection, None)
            .await
        {
            Ok(()) => Ok(()),
            // A concurrent creator got there first.
            Err(err) if command_code(&err) == Some(NAMESPACE_EXISTS) => Ok(()),
            Err(err) => Err(store_err(err)),
        }
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<(), StoreError> {
        match self.collection(ns).drop(None).await {
            Ok(()) => Ok(()),
            // Dropping a collection that never existed is a no-op success.
            Err(err) if command_code(&err) == Some(NAMESPACE_NOT_FOUND) => Ok(()),
            Err(err) => Err(store_err(err)),
        }
    }

    async fn truncate_collection(&self, ns: &Namespace) -> Result<(), StoreError> {
        self.collection(ns)
            .delete_many(doc! {}, None)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn insert_raw(
        &self,
        ns: &Namespace,
        document: RawEventDocument,
    ) -> Result<(), StoreError> {
        self.collection(ns)
            .insert_one(raw_to_doc(&document), None)
            .await
            .map_err(store_err)?;
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
        let direction = match order {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        };
        let mut options = FindOptions::default();
        options.sort = Some(doc! { "recvTime": direction });
        options.skip = skip;
        options.limit = limit.map(|l| l as i64);

        let mut cursor = self
            .collection(ns)
            .find(raw_filter_doc(filter), options)
            .await
            .map_err(store_err)?;
        let mut documents = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(store_err)? {
            documents.push(doc_to_raw(&doc)?);
        }
        Ok(documents)
    }

    async fn seed_bucket(
        &self,
        ns: &Namespace,
        id: &BucketId,
        attr_type: &str,
        points: Vec<AggregatedPoint>,
    ) -> Result<(), StoreError> {
        let points_bson: Vec<Bson> = points
            .iter()
            .map(|point| Bson::Document(point_to_doc(point)))
            .collect();
        let update = doc! {
            "$setOnInsert": { "attrType": attr_type, "points": points_bson },
        };
        let options = UpdateOptions::builder().upsert(true).build();
        match self
            .collection(ns)
            .update_one(doc! { "_id": bucket_id_doc(id) }, update, options)
            .await
        {
            Ok(_) => Ok(()),
            // A concurrent seeder won the upsert race.
            Err(err) if command_code(&err) == Some(DUPLICATE_KEY) => Ok(()),
            Err(err) => Err(store_err(err)),
        }
    }

    async fn accumulate(
        &self,
        ns: &Namespace,
        id: &BucketId,
        offset: u32,
        value: &AttrValue,
    ) -> Result<(), StoreError> {
        let filter = doc! {
            "_id": bucket_id_doc(id),
            "points.offset": offset as i64,
        };
        let update = match value {
            AttrValue::Number(v) => doc! {
                "$inc": {
                    "points.$.samples": 1_i64,
                    "points.$.sum": *v,
                    "points.$.sum2": v * v,
                },
                "$min": { "points.$.min": *v },
                "$max": { "points.$.max": *v },
            },
            AttrValue::Text(v) => {
                let mut increments = doc! { "points.$.samples": 1_i64 };
                increments.insert(
                    format!("points.$.occur.{}", codec::encode_field_name(v)),
                    1_i64,
                );
                doc! { "$inc": increments }
            }
        };
        let result = self
            .collection(ns)
            .update_one(filter, update, None)
            .await
            .map_err(store_err)?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound(format!("{ns} bucket point {offset}")));
        }
        Ok(())
    }

    async fn find_buckets(
        &self,
        ns: &Namespace,
        filter: &BucketFilter,
    ) -> Result<Vec<BucketDocument>, StoreError> {
        let mut options = FindOptions::default();
        options.sort = Some(doc! { "_id.origin": 1 });

        let mut cursor = self
            .collection(ns)
            .find(bucket_filter_doc(filter), options)
            .await
            .map_err(store_err)?;
        let mut buckets = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(store_err)? {
            buckets.push(doc_to_bucket(&doc)?);
        }
        Ok(buckets)
    }

    async fn bucket_point(
        &self,
        ns: &Namespace,
        id: &BucketId,
        offset: u32,
    ) -> Result<Option<AggregatedPoint>, StoreError> {
        let found = self
            .collection(ns)
            .find_one(doc! { "_id": bucket_id_doc(id) }, None)
            .await
            .map_err(store_err)?;
        let Some(doc) = found else {
            return Ok(None);
        };
        let bucket = doc_to_bucket(&doc)?;
        Ok(bucket.points.into_iter().find(|p| p.offset == offset))
    }

    async fn register_name(
        &self,
        ns: &Namespace,
        entry: RegistryEntry,
    ) -> Result<RegistryOutcome, StoreError> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .build();
        let previous = self
            .collection(ns)
            .find_one_and_update(
                doc! { "_id": entry.id.as_str() },
                doc! { "$setOnInsert": entry_to_doc(&entry) },
                options,
            )
            .await
            .map_err(store_err)?;
        match previous {
            None => Ok(RegistryOutcome::Registered),
            Some(doc) => Ok(RegistryOutcome::Existing(doc_to_entry(&doc)?)),
        }
    }

    async fn shutdown(&self) -> Result<(), StoreError> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}
