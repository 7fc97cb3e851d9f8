//! # elif-dataloader
//!
//! Request-scoped batch loading for tree-shaped query resolution.
//!
//! Field resolvers scattered across a query tree each ask for one related item by
//! key. Instead of fetching item by item, every resolver registers its key with the
//! collector for its field and gets a [`Deferred`] placeholder back. The first time
//! any placeholder of a collector is forced, the collector runs its
//! [`BatchResolver`] exactly once with every key queued so far, and all placeholders
//! are answered from that single result map.
//!
//! ## Features
//!
//! - **Deduplication**: repeated keys are fetched once, the last metadata wins
//! - **Single-shot resolution**: one `resolve` call per collector, however many
//!   placeholders are forced
//! - **Structural identity**: list indices are dropped from field paths, so every
//!   item of a list shares one collector
//! - **Request scope**: collectors live in a [`LoaderRegistry`] that is cleared once
//!   the response is produced
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use elif_dataloader::{
//!     BatchResolver, BatchResults, FieldPath, LoaderRegistry, PendingBatch, ResolveResult,
//! };
//!
//! struct UserNames;
//!
//! #[async_trait]
//! impl BatchResolver for UserNames {
//!     type Meta = ();
//!     type Value = String;
//!
//!     async fn resolve(&self, batch: &PendingBatch<()>) -> ResolveResult<BatchResults<String>> {
//!         Ok(batch
//!             .iter()
//!             .map(|entry| (entry.canonical().clone(), format!("user {}", entry.key())))
//!             .collect())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let registry = LoaderRegistry::default();
//! let path: FieldPath = "posts[0].author".parse().unwrap();
//!
//! let loader = registry.get_or_create(&path, || UserNames).unwrap();
//! let first = loader.load("u1", ()).unwrap();
//! let second = loader.load("u2", ()).unwrap();
//!
//! assert_eq!(first.await.unwrap(), "user \"u1\"");
//! assert_eq!(second.await.unwrap(), "user \"u2\"");
//! assert_eq!(loader.stats().resolve_calls, 1);
//!
//! registry.clear_all();
//! # });
//! ```

use thiserror::Error;

pub mod collector;
pub mod config;
pub mod deferred;
pub mod key;
pub mod path;
pub mod registry;

pub use collector::{
    BatchCollector, BatchResolver, BatchResults, CollectorState, CollectorStats, PendingBatch,
    PendingEntry,
};
pub use config::*;
pub use deferred::{force_all, Deferred};
pub use key::{encode, encode_many, CanonicalKey};
pub use path::{instance_identity, FieldPath, PathSegment, DEFAULT_NAMESPACE};
pub use registry::{LoaderFactories, LoaderRegistry};

/// Batch loading errors
///
/// Errors are `Clone` because a single resolve failure is reported to every
/// placeholder of the collector that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Batch resolve failed for '{identity}': {message}")]
    ResolveFailure { identity: String, message: String },

    #[error("Key {key} not found in batch results of '{identity}'")]
    MissingKey { identity: String, key: String },

    #[error("Key {key} was loaded after '{identity}' began resolving")]
    LoadAfterResolve { identity: String, key: String },

    #[error("Loader '{identity}' is not a {expected}")]
    TypeMismatch { identity: String, expected: String },

    #[error("No loader factory registered for {0}")]
    FactoryNotRegistered(String),

    #[error("Loader configuration error: {0}")]
    Configuration(String),
}

impl LoaderError {
    /// Whether the error only means "no value for this key"
    pub fn is_missing_key(&self) -> bool {
        matches!(self, LoaderError::MissingKey { .. })
    }

    /// Whether the error should fail the field instead of resolving it to null
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            LoaderError::MissingKey { .. } | LoaderError::InvalidKey(_)
        )
    }
}

/// Result type for loader operations
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Error type returned by batch resolvers
pub type ResolveError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for batch resolvers
pub type ResolveResult<T> = Result<T, ResolveError>;
