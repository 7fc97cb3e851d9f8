//! Deferred placeholders returned by `load`

use crate::collector::{BatchCollector, BatchResolver};
use crate::key::CanonicalKey;
use crate::LoaderResult;
use futures::future::{join_all, BoxFuture};
use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;

/// Stand-in for a value that a collector will resolve later
///
/// Forcing a placeholder (calling [`force`](Self::force) or awaiting it) runs the
/// owning collector's batch if it has not run yet, then reads this key from the
/// frozen results.
pub struct Deferred<R: BatchResolver> {
    collector: Arc<BatchCollector<R>>,
    key: CanonicalKey,
}

impl<R: BatchResolver> Deferred<R> {
    pub(crate) fn new(collector: Arc<BatchCollector<R>>, key: CanonicalKey) -> Self {
        Self { collector, key }
    }

    pub fn key(&self) -> &CanonicalKey {
        &self.key
    }

    /// Identity of the collector this placeholder belongs to
    pub fn identity(&self) -> &str {
        self.collector.identity()
    }

    /// Whether forcing will answer without running the resolver
    pub fn is_ready(&self) -> bool {
        self.collector.is_resolved()
    }

    /// Resolve the value behind this placeholder
    ///
    /// Fails with `MissingKey` when the resolver did not map this key and with
    /// `ResolveFailure` when the resolver failed.
    pub async fn force(&self) -> LoaderResult<R::Value> {
        self.collector.value_for(&self.key).await
    }

    /// Like [`force`](Self::force), but a key the resolver did not map is `None`
    pub async fn force_optional(&self) -> LoaderResult<Option<R::Value>> {
        match self.force().await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_missing_key() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<R: BatchResolver> Clone for Deferred<R> {
    fn clone(&self) -> Self {
        Self {
            collector: Arc::clone(&self.collector),
            key: self.key.clone(),
        }
    }
}

impl<R: BatchResolver> fmt::Debug for Deferred<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("identity", &self.collector.identity())
            .field("key", &self.key)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl<R: BatchResolver> IntoFuture for Deferred<R> {
    type Output = LoaderResult<R::Value>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.collector.value_for(&self.key).await })
    }
}

/// Force placeholders in order, the way an engine's second sweep does
///
/// Placeholders of the same collector share one resolve call; different
/// collectors resolve independently and a failure in one does not affect the
/// others.
pub async fn force_all<R: BatchResolver>(deferred: &[Deferred<R>]) -> Vec<LoaderResult<R::Value>> {
    join_all(deferred.iter().map(|placeholder| placeholder.force())).await
}
