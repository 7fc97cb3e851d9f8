//! Loader configuration and builder

use crate::path::DEFAULT_NAMESPACE;
use crate::{LoaderError, LoaderResult};
use serde::{Deserialize, Serialize};
use service_builder::builder;

/// Configuration shared by every collector of a registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[builder]
pub struct LoaderConfig {
    /// Prefix of every collector identity
    #[builder(default = "\"dataloader\".to_string()", getter)]
    pub namespace: String,

    /// Log batch keys the resolver left unmapped
    #[builder(default = "true", getter)]
    pub warn_on_missing_keys: bool,

    /// Pending batch size above which a warning is logged (None = no limit)
    #[builder(default, getter)]
    pub max_batch_size: Option<usize>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            warn_on_missing_keys: true,
            max_batch_size: None,
        }
    }
}

impl LoaderConfig {
    pub(crate) fn exceeds_batch_size(&self, pending: usize) -> bool {
        matches!(*self.get_max_batch_size(), Some(max) if pending > max)
    }
}

impl LoaderConfigBuilder {
    /// Development configuration: verbose contract checks, generous batch limit
    pub fn development() -> Self {
        LoaderConfigBuilder::new()
            .warn_on_missing_keys(true)
            .max_batch_size(Some(10_000))
    }

    /// Production configuration: warn about batches large enough to strain the store
    pub fn production() -> Self {
        LoaderConfigBuilder::new()
            .warn_on_missing_keys(false)
            .max_batch_size(Some(1_000))
    }

    /// Testing configuration with its own namespace
    pub fn testing() -> Self {
        LoaderConfigBuilder::new()
            .namespace("dataloader_test".to_string())
            .warn_on_missing_keys(true)
            .max_batch_size(None)
    }

    pub fn build_config(self) -> LoaderResult<LoaderConfig> {
        let config = self
            .build_with_defaults()
            .map_err(|e| LoaderError::Configuration(format!("{:?}", e)))?;
        if config.get_namespace().is_empty() {
            return Err(LoaderError::Configuration("namespace must not be empty".into()));
        }
        if *config.get_max_batch_size() == Some(0) {
            return Err(LoaderError::Configuration(
                "max_batch_size must be greater than zero".into(),
            ));
        }
        Ok(config)
    }
}
