//! Core types: logical keys, data models, resolutions and document shapes
//!
//! Everything that crosses the backend boundary keeps the wire field names of
//! the on-disk documents (`recvTime`, `attrName`, `points.offset`, ...) so
//! external reporting and migration tooling can read the collections directly.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ============================================================================
// Logical Key
// ============================================================================

/// The logical key of an observation stream
///
/// Immutable per call; never persisted as a single object. The active
/// [`DataModel`] decides how much of it is folded into the physical
/// collection identifier and how much stays on each document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeKey {
    /// Tenant / service the data belongs to
    pub service: String,
    /// Hierarchical service path within the tenant
    pub service_path: String,
    /// Entity identifier
    pub entity_id: String,
    /// Entity type
    pub entity_type: String,
    /// Attribute name
    pub attr_name: String,
    /// Attribute type
    pub attr_type: String,
}

/// An observed attribute value
///
/// The variant is the caller's declaration of the aggregation semantics:
/// numeric values accumulate `sum`/`sum2`/`min`/`max`, textual values
/// accumulate occurrence counts. It is never inferred from history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// A numeric observation
    Number(f64),
    /// A categorical observation
    Text(String),
}

impl AttrValue {
    /// Whether this value carries numeric aggregation semantics
    pub fn is_numeric(&self) -> bool {
        matches!(self, AttrValue::Number(_))
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Number(n) => write!(f, "{n}"),
            AttrValue::Text(s) => f.write_str(s),
        }
    }
}

// ============================================================================
// Data Model
// ============================================================================

/// Granularity at which observations are grouped into physical collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataModel {
    /// One collection per service path
    PerServicePath,
    /// One collection per entity
    PerEntity,
    /// One collection per attribute
    PerAttribute,
}

impl DataModel {
    /// All supported data models
    pub const ALL: [DataModel; 3] = [
        DataModel::PerServicePath,
        DataModel::PerEntity,
        DataModel::PerAttribute,
    ];

    /// Canonical string form
    pub fn as_str(&self) -> &'static str {
        match self {
            DataModel::PerServicePath => "per-service-path",
            DataModel::PerEntity => "per-entity",
            DataModel::PerAttribute => "per-attribute",
        }
    }

    /// The key fields folded into the collection identifier, in join order
    pub fn folded_fields<'a>(&self, key: &'a AttributeKey) -> Vec<&'a str> {
        match self {
            DataModel::PerServicePath => vec![key.service_path.as_str()],
            DataModel::PerEntity => vec![
                key.service_path.as_str(),
                key.entity_id.as_str(),
                key.entity_type.as_str(),
            ],
            DataModel::PerAttribute => vec![
                key.service_path.as_str(),
                key.entity_id.as_str(),
                key.entity_type.as_str(),
                key.attr_name.as_str(),
            ],
        }
    }

    /// The key suffix kept as document fields so queries can still filter
    ///
    /// Returns `(entity_id, entity_type, attr_name)`; a field is `None` when
    /// the data model already encodes it in the collection identity.
    pub fn document_fields(
        &self,
        key: &AttributeKey,
    ) -> (Option<String>, Option<String>, Option<String>) {
        match self {
            DataModel::PerServicePath => (
                Some(key.entity_id.clone()),
                Some(key.entity_type.clone()),
                Some(key.attr_name.clone()),
            ),
            DataModel::PerEntity => (None, None, Some(key.attr_name.clone())),
            DataModel::PerAttribute => (None, None, None),
        }
    }
}

impl fmt::Display for DataModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-service-path" => Ok(DataModel::PerServicePath),
            "per-entity" => Ok(DataModel::PerEntity),
            "per-attribute" => Ok(DataModel::PerAttribute),
            other => Err(Error::InvalidDataModel(other.to_string())),
        }
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// A time-bucketing granularity at which rollups are maintained
///
/// The bucket period is the *parent* unit: second-resolution buckets
/// originate at the start of a minute and index seconds 0-59 within it,
/// month-resolution buckets originate at the start of a year and index
/// months 0-11.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Second-of-minute rollups
    Second,
    /// Minute-of-hour rollups
    Minute,
    /// Hour-of-day rollups
    Hour,
    /// Day-of-month rollups
    Day,
    /// Month-of-year rollups
    Month,
}

impl Resolution {
    /// All supported resolutions, finest first
    pub const ALL: [Resolution; 5] = [
        Resolution::Second,
        Resolution::Minute,
        Resolution::Hour,
        Resolution::Day,
        Resolution::Month,
    ];

    /// Canonical string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Second => "second",
            Resolution::Minute => "minute",
            Resolution::Hour => "hour",
            Resolution::Day => "day",
            Resolution::Month => "month",
        }
    }

    /// The valid offsets within one bucket period
    pub fn offsets(&self) -> std::ops::RangeInclusive<u32> {
        match self {
            Resolution::Second => 0..=59,
            Resolution::Minute => 0..=59,
            Resolution::Hour => 0..=23,
            Resolution::Day => 1..=31,
            Resolution::Month => 0..=11,
        }
    }

    /// Start-of-period timestamp identifying the bucket that covers `at`
    pub fn origin(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        let truncated = match self {
            Resolution::Second => date.and_hms_opt(at.hour(), at.minute(), 0),
            Resolution::Minute => date.and_hms_opt(at.hour(), 0, 0),
            Resolution::Hour => date.and_hms_opt(0, 0, 0),
            Resolution::Day => date.with_day(1).and_then(|d| d.and_hms_opt(0, 0, 0)),
            Resolution::Month => date
                .with_day(1)
                .and_then(|d| d.with_month(1))
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
        };
        // Truncation of a valid instant is always a valid instant.
        truncated
            .map(|naive| Utc.from_utc_datetime(&naive))
            .unwrap_or(at)
    }

    /// Position of `at` within its bucket period
    pub fn offset_of(&self, at: DateTime<Utc>) -> u32 {
        match self {
            Resolution::Second => at.second(),
            Resolution::Minute => at.minute(),
            Resolution::Hour => at.hour(),
            Resolution::Day => at.day(),
            Resolution::Month => at.month0(),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "second" => Ok(Resolution::Second),
            "minute" => Ok(Resolution::Minute),
            "hour" => Ok(Resolution::Hour),
            "day" => Ok(Resolution::Day),
            "month" => Ok(Resolution::Month),
            other => Err(Error::InvalidResolution(other.to_string())),
        }
    }
}

// ============================================================================
// Storage Policy
// ============================================================================

/// Per-call storage policy
///
/// The active data model, the hashing flag and the resolution set are
/// explicit on every call rather than process-global state, so concurrent
/// callers with differing configurations never interfere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePolicy {
    /// Collection sharding granularity
    pub data_model: DataModel,
    /// Replace long human-readable identifiers with fixed-size digests
    pub hash_names: bool,
    /// Resolutions maintained by the aggregation engine
    pub resolutions: Vec<Resolution>,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            data_model: DataModel::PerEntity,
            hash_names: false,
            resolutions: Resolution::ALL.to_vec(),
        }
    }
}

// ============================================================================
// Stored Documents
// ============================================================================

/// A raw event document: one observation, immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEventDocument {
    /// Reception timestamp
    pub recv_time: DateTime<Utc>,
    /// Entity identifier, present unless folded into the collection identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Entity type, present unless folded into the collection identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Attribute name, present unless folded into the collection identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr_name: Option<String>,
    /// Attribute type
    pub attr_type: String,
    /// Observed value
    pub attr_value: AttrValue,
}

/// The compound key of one aggregation bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketId {
    /// Entity identifier, per data model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Entity type, per data model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Attribute name, per data model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr_name: Option<String>,
    /// Rollup granularity of the bucket
    pub resolution: Resolution,
    /// Start-of-period timestamp
    pub origin: DateTime<Utc>,
}

/// Statistics accumulated at one offset of a bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointStats {
    /// Numeric accumulation
    Numeric {
        /// Sum of observed values
        sum: f64,
        /// Sum of squared observed values
        sum2: f64,
        /// Minimum observed value
        min: f64,
        /// Maximum observed value
        max: f64,
    },
    /// Categorical accumulation
    Textual {
        /// Occurrence count per distinct value
        occur: BTreeMap<String, u64>,
    },
}

impl PointStats {
    /// Zeroed numeric statistics (extrema at the identity elements)
    pub fn empty_numeric() -> Self {
        PointStats::Numeric {
            sum: 0.0,
            sum2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Empty categorical statistics
    pub fn empty_textual() -> Self {
        PointStats::Textual {
            occur: BTreeMap::new(),
        }
    }
}

/// One entry of a bucket's sparse `points` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPoint {
    /// Position within the bucket period
    pub offset: u32,
    /// Number of observations accumulated at this offset
    pub samples: u64,
    /// Accumulated statistics
    #[serde(flatten)]
    pub stats: PointStats,
}

/// A full aggregation bucket document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketDocument {
    /// Compound bucket key
    #[serde(rename = "_id")]
    pub id: BucketId,
    /// Attribute type of the accumulated values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr_type: Option<String>,
    /// Per-offset statistics, one entry per possible offset
    pub points: Vec<AggregatedPoint>,
}

/// One collision-registry document: the original key behind a hashed name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    /// The hashed collection identifier
    #[serde(rename = "_id")]
    pub id: String,
    /// Data model the name was derived under
    pub data_model: DataModel,
    /// Whether the name addresses the aggregated collection
    pub is_aggregated: bool,
    /// Tenant / service
    pub service: String,
    /// Service path
    pub service_path: String,
    /// Entity identifier, for entity-scoped and finer models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Entity type, for entity-scoped and finer models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Attribute name, for attribute-scoped models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr_name: Option<String>,
    /// Attribute type, for attribute-scoped models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr_type: Option<String>,
}

impl RegistryEntry {
    /// Build the registry entry for a hashed identifier and its source key
    ///
    /// More specific data models carry more key fields, the coarser ones only
    /// the service/service-path pair.
    pub fn from_key(
        id: String,
        key: &AttributeKey,
        data_model: DataModel,
        is_aggregated: bool,
    ) -> Self {
        let (entity_id, entity_type, attr_name, attr_type) = match data_model {
            DataModel::PerServicePath => (None, None, None, None),
            DataModel::PerEntity => (
                Some(key.entity_id.clone()),
                Some(key.entity_type.clone()),
                None,
                None,
            ),
            DataModel::PerAttribute => (
                Some(key.entity_id.clone()),
                Some(key.entity_type.clone()),
                Some(key.attr_name.clone()),
                Some(key.attr_type.clone()),
            ),
        };
        Self {
            id,
            data_model,
            is_aggregated,
            service: key.service.clone(),
            service_path: key.service_path.clone(),
            entity_id,
            entity_type,
            attr_name,
            attr_type,
        }
    }
}

// ============================================================================
// Call Options and Replies
// ============================================================================

/// Options for [`crate::Historian::get_collection`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GetCollectionOpts {
    /// Create the collection when it does not exist; when `false`, absence is
    /// reported as [`Error::CollectionNotFound`] and nothing is created
    pub should_create: bool,
    /// Address the aggregated collection rather than the raw one
    pub is_aggregated: bool,
    /// Record the hashed-name/key mapping in the collision registry
    pub should_store_hash: bool,
    /// Empty an existing collection before returning it (re-seeding)
    pub should_truncate: bool,
}

/// A resolved physical collection plus any collision observed while
/// registering its hashed name
///
/// On a collision the collection is still usable; the registry merely makes
/// the ambiguity observable.
#[derive(Debug, Clone)]
pub struct CollectionAccess {
    /// The resolved physical collection
    pub collection: crate::backend::Namespace,
    /// The previously registered key when a distinct key produced this name
    pub collision: Option<RegistryEntry>,
}

/// Result of classifying an incoming observation against stored state
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationInfo {
    /// No prior observation for the key: a plain insert
    Inserts,
    /// An observation with the identical reception time already exists
    Exists(RawEventDocument),
    /// A logically later observation for an existing key
    Updates {
        /// The most recent stored observation
        prior: RawEventDocument,
        /// Per resolution, whether the new value would become a new minimum
        new_min: BTreeMap<Resolution, bool>,
    },
}

/// Options for raw-data retrieval
#[derive(Debug, Clone, Default)]
pub struct RawQuery {
    /// Lower reception-time bound (inclusive)
    pub from: Option<DateTime<Utc>>,
    /// Upper reception-time bound (exclusive)
    pub to: Option<DateTime<Utc>>,
    /// Return only the most recent N documents
    pub last_n: Option<u64>,
    /// Page size over ascending reception time
    pub h_limit: Option<u64>,
    /// Page offset over ascending reception time
    pub h_offset: Option<u64>,
    /// Output format; `"csv"` renders a delimited-text payload, anything
    /// else (or absence) returns structured rows
    pub filetype: Option<String>,
}

/// Reply of a raw-data retrieval
#[derive(Debug, Clone, PartialEq)]
pub enum RawDataReply {
    /// Structured rows, ascending by reception time
    Documents(Vec<RawEventDocument>),
    /// The same rows as a single CSV payload
    Csv(String),
}

impl RawDataReply {
    /// The structured rows, when the reply is not CSV
    pub fn documents(&self) -> Option<&[RawEventDocument]> {
        match self {
            RawDataReply::Documents(docs) => Some(docs),
            RawDataReply::Csv(_) => None,
        }
    }
}

/// The derived statistic(s) to project from matching points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    /// Sum of values
    Sum,
    /// Sum of squared values
    Sum2,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Occurrence counts of categorical values
    Occur,
}

impl FromStr for AggregateFunction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(AggregateFunction::Sum),
            "sum2" => Ok(AggregateFunction::Sum2),
            "min" => Ok(AggregateFunction::Min),
            "max" => Ok(AggregateFunction::Max),
            "occur" => Ok(AggregateFunction::Occur),
            other => Err(Error::Retrieval(format!(
                "unknown aggregated function '{other}'"
            ))),
        }
    }
}

/// Options for aggregated-data retrieval
#[derive(Debug, Clone, Default)]
pub struct AggregatedQuery {
    /// Restrict to one resolution; absent means one result per configured
    /// resolution
    pub resolution: Option<Resolution>,
    /// Statistic to project; absent projects all accumulated statistics
    pub aggregated_function: Option<AggregateFunction>,
    /// Lower bucket-origin bound (inclusive)
    pub from: Option<DateTime<Utc>>,
    /// Upper bucket-origin bound (exclusive)
    pub to: Option<DateTime<Utc>>,
}

/// One point of a bucket projection, with only the requested statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPoint {
    /// Position within the bucket period
    pub offset: u32,
    /// Number of accumulated observations
    pub samples: u64,
    /// Sum of values, when requested and numeric
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    /// Sum of squared values, when requested and numeric
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum2: Option<f64>,
    /// Minimum value, when requested and numeric
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Maximum value, when requested and numeric
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Occurrence counts, when requested and categorical
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occur: Option<BTreeMap<String, u64>>,
}

/// A bucket restricted to the requested statistic(s)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketProjection {
    /// Compound bucket key
    #[serde(rename = "_id")]
    pub id: BucketId,
    /// Attribute type of the accumulated values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr_type: Option<String>,
    /// Projected per-offset statistics, empty offsets omitted
    pub points: Vec<ProjectedPoint>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_origin_truncates_to_parent_unit() {
        let t = at(2024, 3, 15, 10, 42, 37);
        assert_eq!(Resolution::Second.origin(t), at(2024, 3, 15, 10, 42, 0));
        assert_eq!(Resolution::Minute.origin(t), at(2024, 3, 15, 10, 0, 0));
        assert_eq!(Resolution::Hour.origin(t), at(2024, 3, 15, 0, 0, 0));
        assert_eq!(Resolution::Day.origin(t), at(2024, 3, 1, 0, 0, 0));
        assert_eq!(Resolution::Month.origin(t), at(2024, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_offset_positions() {
        let t = at(2024, 3, 15, 10, 42, 37);
        assert_eq!(Resolution::Second.offset_of(t), 37);
        assert_eq!(Resolution::Minute.offset_of(t), 42);
        assert_eq!(Resolution::Hour.offset_of(t), 10);
        assert_eq!(Resolution::Day.offset_of(t), 15);
        assert_eq!(Resolution::Month.offset_of(t), 2);
    }

    #[test]
    fn test_offsets_cover_every_observation() {
        let t = at(2024, 12, 31, 23, 59, 59);
        for resolution in Resolution::ALL {
            assert!(resolution.offsets().contains(&resolution.offset_of(t)));
        }
    }

    #[test]
    fn test_folded_fields_grow_with_model_specificity() {
        let key = AttributeKey {
            service: "factory".into(),
            service_path: "/floor1".into(),
            entity_id: "press7".into(),
            entity_type: "Machine".into(),
            attr_name: "temperature".into(),
            attr_type: "Number".into(),
        };
        assert_eq!(DataModel::PerServicePath.folded_fields(&key).len(), 1);
        assert_eq!(DataModel::PerEntity.folded_fields(&key).len(), 3);
        assert_eq!(DataModel::PerAttribute.folded_fields(&key).len(), 4);
    }

    #[test]
    fn test_document_fields_complement_folded_fields() {
        let key = AttributeKey {
            service: "factory".into(),
            service_path: "/floor1".into(),
            entity_id: "press7".into(),
            entity_type: "Machine".into(),
            attr_name: "temperature".into(),
            attr_type: "Number".into(),
        };
        let (id, ty, name) = DataModel::PerServicePath.document_fields(&key);
        assert!(id.is_some() && ty.is_some() && name.is_some());
        let (id, ty, name) = DataModel::PerEntity.document_fields(&key);
        assert!(id.is_none() && ty.is_none() && name.is_some());
        let (id, ty, name) = DataModel::PerAttribute.document_fields(&key);
        assert!(id.is_none() && ty.is_none() && name.is_none());
    }

    #[test]
    fn test_resolution_parse_rejects_unknown() {
        assert!("minute".parse::<Resolution>().is_ok());
        assert!("fortnight".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_data_model_parse_round_trip() {
        for model in DataModel::ALL {
            assert_eq!(model.as_str().parse::<DataModel>().unwrap(), model);
        }
    }
}
