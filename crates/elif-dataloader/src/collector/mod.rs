use crate::{
    config::LoaderConfig,
    deferred::Deferred,
    key::{encode, CanonicalKey},
    LoaderError, LoaderResult, ResolveResult,
};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

pub mod batch;
pub mod stats;

pub use batch::{BatchResults, PendingBatch, PendingEntry};
pub use stats::CollectorStats;

use stats::StatsCounters;

/// Fetches every queued key of a collector in one go
///
/// Implementations are the concrete data sources (a multi-key store lookup, an
/// `IN (...)` query, a bulk HTTP call). `resolve` is called at most once per
/// collector. Keys it leaves out of the returned map are reported as not found;
/// an error fails every placeholder of the collector.
#[async_trait]
pub trait BatchResolver: Send + Sync + 'static {
    /// Per-call metadata passed along with a key
    type Meta: Send + Sync + 'static;
    /// Resolved value handed to each placeholder
    type Value: Clone + Send + Sync + 'static;

    async fn resolve(
        &self,
        batch: &PendingBatch<Self::Meta>,
    ) -> ResolveResult<BatchResults<Self::Value>>;

    /// Name used in logs and type errors
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Lifecycle of a collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    /// No key queued yet
    Empty,
    /// Keys queued, nothing forced yet
    Accumulating,
    /// A placeholder was forced and the resolver is running
    Resolving,
    /// Results are frozen
    Resolved,
    /// The resolver failed, every placeholder reports the failure
    Failed,
}

type Frozen<V> = Result<Arc<BatchResults<V>>, LoaderError>;

/// The one resolve run of a sealed batch. Every forcer polls a clone, so a
/// forcer that is dropped mid-flight leaves the run to the next one.
type Resolution<V> = Shared<BoxFuture<'static, Frozen<V>>>;

enum Phase<M, V> {
    Open {
        batch: PendingBatch<M>,
        overflow_warned: bool,
    },
    Sealed {
        batch: Arc<PendingBatch<M>>,
        resolution: Resolution<V>,
    },
}

/// Per-field batch collector
///
/// Queues keys through [`load`](Self::load) and hands out [`Deferred`]
/// placeholders. The first forced placeholder seals the batch and runs the
/// resolver; every placeholder then reads from the same frozen result map.
pub struct BatchCollector<R: BatchResolver> {
    identity: String,
    resolver: Arc<R>,
    config: Arc<LoaderConfig>,
    phase: Mutex<Phase<R::Meta, R::Value>>,
    stats: StatsCounters,
}

impl<R: BatchResolver> BatchCollector<R> {
    /// Create a collector with the default configuration
    pub fn new(identity: impl Into<String>, resolver: R) -> Self {
        Self::with_config(identity, resolver, Arc::new(LoaderConfig::default()))
    }

    /// Create a collector sharing a registry's configuration
    pub fn with_config(identity: impl Into<String>, resolver: R, config: Arc<LoaderConfig>) -> Self {
        Self {
            identity: identity.into(),
            resolver: Arc::new(resolver),
            config,
            phase: Mutex::new(Phase::Open {
                batch: PendingBatch::new(),
                overflow_warned: false,
            }),
            stats: StatsCounters::default(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Queue a key and return its placeholder
    ///
    /// Never blocks and never triggers resolution. A key already queued keeps its
    /// place in the batch and takes the new metadata. Once resolution has begun,
    /// only keys that are part of the sealed batch are accepted; any other key
    /// fails with [`LoaderError::LoadAfterResolve`].
    pub fn load(self: &Arc<Self>, key: impl Into<Value>, meta: R::Meta) -> LoaderResult<Deferred<R>> {
        let key = key.into();
        let canonical = encode(&key)?;
        self.queue(canonical.clone(), key, meta)?;
        Ok(Deferred::new(Arc::clone(self), canonical))
    }

    /// Queue several keys with the same metadata
    ///
    /// Placeholders come back in input order. Every key is validated before any
    /// is queued, so an invalid key leaves the batch untouched.
    pub fn load_many<I, K>(self: &Arc<Self>, keys: I, meta: R::Meta) -> LoaderResult<Vec<Deferred<R>>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Value>,
        R::Meta: Clone,
    {
        let encoded = keys
            .into_iter()
            .map(|key| {
                let key = key.into();
                encode(&key).map(|canonical| (canonical, key))
            })
            .collect::<LoaderResult<Vec<_>>>()?;

        let mut deferred = Vec::with_capacity(encoded.len());
        for (canonical, key) in encoded {
            self.queue(canonical.clone(), key, meta.clone())?;
            deferred.push(Deferred::new(Arc::clone(self), canonical));
        }
        Ok(deferred)
    }

    fn queue(&self, canonical: CanonicalKey, key: Value, meta: R::Meta) -> LoaderResult<()> {
        let mut phase = self.phase.lock();
        match &mut *phase {
            Phase::Open {
                batch,
                overflow_warned,
            } => {
                if batch.upsert(canonical.clone(), key, meta) {
                    StatsCounters::bump(&self.stats.unique_keys);
                    tracing::trace!("Queued key {} on '{}'", canonical, self.identity);
                    if !*overflow_warned && self.config.exceeds_batch_size(batch.len()) {
                        *overflow_warned = true;
                        tracing::warn!(
                            "Batch for '{}' grew past {} keys, it will still be resolved in one call",
                            self.identity,
                            self.config.get_max_batch_size().unwrap_or_default()
                        );
                    }
                } else {
                    StatsCounters::bump(&self.stats.deduplicated);
                    tracing::trace!("Deduplicated key {} on '{}'", canonical, self.identity);
                }
            }
            Phase::Sealed { batch, .. } => {
                if !batch.contains(&canonical) {
                    StatsCounters::bump(&self.stats.rejected);
                    tracing::warn!(
                        "Rejected key {} on '{}': the batch is already resolving",
                        canonical,
                        self.identity
                    );
                    return Err(LoaderError::LoadAfterResolve {
                        identity: self.identity.clone(),
                        key: canonical.into_string(),
                    });
                }
                StatsCounters::bump(&self.stats.deduplicated);
                tracing::trace!(
                    "Key {} on '{}' joins the sealed batch, metadata ignored",
                    canonical,
                    self.identity
                );
            }
        }
        StatsCounters::bump(&self.stats.load_calls);
        Ok(())
    }

    /// Value of one key, running the batch first if it has not run yet
    pub(crate) async fn value_for(&self, key: &CanonicalKey) -> LoaderResult<R::Value> {
        StatsCounters::bump(&self.stats.forced);
        match self.resolution().await {
            Ok(results) => results.get(key).cloned().ok_or_else(|| LoaderError::MissingKey {
                identity: self.identity.clone(),
                key: key.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Seal the batch on first use and hand out the shared resolve run
    fn resolution(&self) -> Resolution<R::Value> {
        let mut phase = self.phase.lock();
        let batch = match &mut *phase {
            Phase::Sealed { resolution, .. } => return resolution.clone(),
            Phase::Open { batch, .. } => Arc::new(std::mem::take(batch)),
        };
        StatsCounters::bump(&self.stats.resolve_calls);
        let resolution = self.run_batch(Arc::clone(&batch)).shared();
        *phase = Phase::Sealed {
            batch,
            resolution: resolution.clone(),
        };
        resolution
    }

    fn run_batch(&self, batch: Arc<PendingBatch<R::Meta>>) -> BoxFuture<'static, Frozen<R::Value>> {
        let resolver = Arc::clone(&self.resolver);
        let identity = self.identity.clone();
        let warn_on_missing_keys = *self.config.get_warn_on_missing_keys();

        async move {
            tracing::debug!(
                "Resolving {} keys for '{}' with {}",
                batch.len(),
                identity,
                resolver.name()
            );

            let started = Instant::now();
            let results = match resolver.resolve(&batch).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::error!("Batch resolve for '{}' failed: {}", identity, e);
                    return Err(LoaderError::ResolveFailure {
                        identity,
                        message: e.to_string(),
                    });
                }
            };
            tracing::debug!(
                "Resolved '{}': {} of {} keys mapped in {:?}",
                identity,
                results.len(),
                batch.len(),
                started.elapsed()
            );

            if warn_on_missing_keys {
                let missing: Vec<&str> = batch
                    .canonical_keys()
                    .iter()
                    .filter(|key| !results.contains(key))
                    .map(|key| key.as_str())
                    .collect();
                if !missing.is_empty() {
                    tracing::warn!(
                        "Resolver {} left {} keys of '{}' unmapped: {}",
                        resolver.name(),
                        missing.len(),
                        identity,
                        missing.join(", ")
                    );
                }
            }

            Ok(Arc::new(results))
        }
        .boxed()
    }

    pub fn state(&self) -> CollectorState {
        match &*self.phase.lock() {
            Phase::Open { batch, .. } if batch.is_empty() => CollectorState::Empty,
            Phase::Open { .. } => CollectorState::Accumulating,
            Phase::Sealed { resolution, .. } => match resolution.peek() {
                None => CollectorState::Resolving,
                Some(Ok(_)) => CollectorState::Resolved,
                Some(Err(_)) => CollectorState::Failed,
            },
        }
    }

    /// Whether the batch has run, successfully or not
    pub fn is_resolved(&self) -> bool {
        match &*self.phase.lock() {
            Phase::Open { .. } => false,
            Phase::Sealed { resolution, .. } => resolution.peek().is_some(),
        }
    }

    /// Number of distinct keys queued or sealed
    pub fn pending_len(&self) -> usize {
        match &*self.phase.lock() {
            Phase::Open { batch, .. } => batch.len(),
            Phase::Sealed { batch, .. } => batch.len(),
        }
    }

    pub fn stats(&self) -> CollectorStats {
        self.stats.snapshot()
    }
}

impl<R: BatchResolver> fmt::Debug for BatchCollector<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCollector")
            .field("identity", &self.identity)
            .field("resolver", &self.resolver.name())
            .field("state", &self.state())
            .field("pending", &self.pending_len())
            .finish()
    }
}

#[cfg(test)]
mod tests;
