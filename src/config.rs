//! Configuration management with TOML support
//!
//! File-based configuration with sensible defaults and environment variable
//! overrides. The per-call [`StoragePolicy`] is projected from here so the
//! active data model and hashing flag travel explicitly with every call
//! instead of living in process-global state.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{DataModel, Resolution, StoragePolicy};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Store connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Identifier derivation settings
    #[serde(default)]
    pub naming: NamingConfig,

    /// Data layout and rollup settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Store connection settings
///
/// Pool size, auth and replica-set topology are opaque to the engine and
/// passed through to the underlying client.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Store URI, e.g. `mongodb://127.0.0.1:27017`
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Maximum connections in the client pool
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Replica set name, when connecting to a replica set
    #[serde(default)]
    pub replica_set: Option<String>,

    /// Username for authenticated deployments
    #[serde(default)]
    pub username: Option<String>,

    /// Password for authenticated deployments
    #[serde(default)]
    pub password: Option<String>,

    /// Authentication database
    #[serde(default)]
    pub auth_source: Option<String>,

    /// Timeout for establishing the initial connection, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Identifier derivation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NamingConfig {
    /// Prefix of every database identifier
    #[serde(default = "default_database_prefix")]
    pub database_prefix: String,

    /// Prefix of every collection identifier
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,

    /// Namespace budget of the store (`database.collection`, in bytes)
    #[serde(default = "default_max_namespace_bytes")]
    pub max_namespace_bytes: usize,

    /// Replace long human-readable identifiers with fixed-size digests
    #[serde(default)]
    pub hash_names: bool,
}

/// Data layout and rollup settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Collection sharding granularity
    #[serde(default = "default_data_model")]
    pub data_model: DataModel,

    /// Resolutions maintained by the aggregation engine
    #[serde(default = "default_resolutions")]
    pub resolutions: Vec<Resolution>,

    /// Service assumed when a caller does not name one
    #[serde(default = "default_service")]
    pub default_service: String,

    /// Service path assumed when a caller does not name one
    #[serde(default = "default_service_path")]
    pub default_service_path: String,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus counters
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_uri() -> String {
    "mongodb://127.0.0.1:27017".to_string()
}
fn default_pool_size() -> u32 {
    5
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_database_prefix() -> String {
    "tm_".to_string()
}
fn default_collection_prefix() -> String {
    "tm_".to_string()
}
fn default_max_namespace_bytes() -> usize {
    120
}
fn default_data_model() -> DataModel {
    DataModel::PerEntity
}
fn default_resolutions() -> Vec<Resolution> {
    Resolution::ALL.to_vec()
}
fn default_service() -> String {
    "testservice".to_string()
}
fn default_service_path() -> String {
    "/testservicepath".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            pool_size: default_pool_size(),
            replica_set: None,
            username: None,
            password: None,
            auth_source: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            database_prefix: default_database_prefix(),
            collection_prefix: default_collection_prefix(),
            max_namespace_bytes: default_max_namespace_bytes(),
            hash_names: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_model: default_data_model(),
            resolutions: default_resolutions(),
            default_service: default_service(),
            default_service_path: default_service_path(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("failed to read {path}: {e}")))?;

        toml::from_str(&contents)
            .map_err(|e| Error::Configuration(format!("failed to parse {path}: {e}")))
    }

    /// Load configuration from a TOML file with environment overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from defaults and environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(uri) = std::env::var("TIDEMARK_URI") {
            self.connection.uri = uri;
        }
        if let Ok(pool_size) = std::env::var("TIDEMARK_POOL_SIZE") {
            if let Ok(n) = pool_size.parse() {
                self.connection.pool_size = n;
            }
        }
        if let Ok(replica_set) = std::env::var("TIDEMARK_REPLICA_SET") {
            self.connection.replica_set = Some(replica_set);
        }
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.connection.uri.is_empty() {
            return Err(Error::Configuration("store URI cannot be empty".into()));
        }
        if self.connection.pool_size == 0 {
            return Err(Error::Configuration("pool size must be > 0".into()));
        }
        if self.naming.database_prefix.is_empty() || self.naming.collection_prefix.is_empty() {
            return Err(Error::Configuration(
                "identifier prefixes cannot be empty".into(),
            ));
        }
        if self.naming.max_namespace_bytes < 64 {
            return Err(Error::Configuration(
                "namespace budget below 64 bytes leaves no room for identifiers".into(),
            ));
        }
        if self.storage.resolutions.is_empty() {
            return Err(Error::Configuration(
                "at least one resolution must be configured".into(),
            ));
        }
        Ok(())
    }

    /// Project the per-call storage policy from this configuration
    pub fn policy(&self) -> StoragePolicy {
        StoragePolicy {
            data_model: self.storage.data_model,
            hash_names: self.naming.hash_names,
            resolutions: self.storage.resolutions.clone(),
        }
    }
}
