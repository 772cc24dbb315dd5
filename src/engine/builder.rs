//! Builder for the historian

use std::sync::Arc;

use crate::backend::DocumentBackend;
use crate::config::Config;
use crate::error::Result;
use crate::types::{DataModel, Resolution};

use super::Historian;

/// Fluent construction of a [`Historian`]
///
/// ```rust,no_run
/// use tidemark::{DataModel, Historian};
///
/// # async fn example() -> tidemark::Result<()> {
/// let historian = Historian::builder()
///     .uri("mongodb://127.0.0.1:27017")
///     .pool_size(8)
///     .data_model(DataModel::PerEntity)
///     .hash_names(true)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct HistorianBuilder {
    config: Config,
    backend: Option<Arc<dyn DocumentBackend>>,
}

impl HistorianBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the store URI
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.config.connection.uri = uri.into();
        self
    }

    /// Set the client pool size
    pub fn pool_size(mut self, pool_size: u32) -> Self {
        self.config.connection.pool_size = pool_size;
        self
    }

    /// Set the replica set name
    pub fn replica_set(mut self, replica_set: impl Into<String>) -> Self {
        self.config.connection.replica_set = Some(replica_set.into());
        self
    }

    /// Set the default data model projected into [`Config::policy`]
    pub fn data_model(mut self, data_model: DataModel) -> Self {
        self.config.storage.data_model = data_model;
        self
    }

    /// Enable or disable identifier hashing
    pub fn hash_names(mut self, hash_names: bool) -> Self {
        self.config.naming.hash_names = hash_names;
        self
    }

    /// Narrow the maintained resolution set
    pub fn resolutions(mut self, resolutions: Vec<Resolution>) -> Self {
        self.config.storage.resolutions = resolutions;
        self
    }

    /// Use an already constructed backend instead of connecting
    pub fn backend(mut self, backend: Arc<dyn DocumentBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Validate the configuration and produce the historian
    pub async fn build(self) -> Result<Historian> {
        match self.backend {
            Some(backend) => {
                self.config.validate()?;
                Ok(Historian::with_backend(backend, self.config))
            }
            None => Historian::connect(self.config).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::MemoryBackend;

    use super::*;

    #[tokio::test]
    async fn test_builder_over_injected_backend() {
        let historian = Historian::builder()
            .data_model(DataModel::PerAttribute)
            .hash_names(true)
            .resolutions(vec![Resolution::Minute])
            .backend(Arc::new(MemoryBackend::new()))
            .build()
            .await
            .expect("build");

        let policy = historian.config().policy();
        assert_eq!(policy.data_model, DataModel::PerAttribute);
        assert!(policy.hash_names);
        assert_eq!(policy.resolutions, vec![Resolution::Minute]);
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_config() {
        let result = Historian::builder()
            .resolutions(Vec::new())
            .backend(Arc::new(MemoryBackend::new()))
            .build()
            .await;
        assert!(result.is_err());
    }
}
