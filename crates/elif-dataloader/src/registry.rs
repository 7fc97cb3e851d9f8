//! Request-scoped loader registry
//!
//! A [`LoaderRegistry`] owns every collector created while one request is
//! evaluated, keyed by the identity of its field path. The engine creates one per
//! request, hands it to resolvers, and calls [`LoaderRegistry::clear_all`] once the
//! response is produced so the next request starts from an empty table.

use crate::collector::{BatchCollector, BatchResolver, CollectorState, CollectorStats};
use crate::config::LoaderConfig;
use crate::deferred::Deferred;
use crate::path::{instance_identity, PathSegment};
use crate::{LoaderError, LoaderResult};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::sync::Arc;
use uuid::Uuid;

/// Type-erased view of a collector, enough to report on it and downcast it back
trait ErasedCollector: Send + Sync {
    fn state(&self) -> CollectorState;
    fn stats(&self) -> CollectorStats;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<R: BatchResolver> ErasedCollector for BatchCollector<R> {
    fn state(&self) -> CollectorState {
        BatchCollector::state(self)
    }

    fn stats(&self) -> CollectorStats {
        BatchCollector::stats(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

type FactoryFn = dyn Fn() -> Box<dyn Any + Send + Sync> + Send + Sync;

/// Constructors for resolver types
///
/// Registered once at application start and shared by every request's registry.
/// Constructor arguments (connection pools, clients) are captured by the closure.
#[derive(Clone, Default)]
pub struct LoaderFactories {
    factories: Arc<DashMap<TypeId, Arc<FactoryFn>>>,
}

impl LoaderFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the constructor for `R`, replacing any previous one
    pub fn register<R, F>(&self, factory: F) -> &Self
    where
        R: BatchResolver,
        F: Fn() -> R + Send + Sync + 'static,
    {
        let erased: Arc<FactoryFn> = Arc::new(move || Box::new(factory()) as Box<dyn Any + Send + Sync>);
        if self.factories.insert(TypeId::of::<R>(), erased).is_some() {
            tracing::debug!("Replaced loader factory for {}", std::any::type_name::<R>());
        } else {
            tracing::debug!("Registered loader factory for {}", std::any::type_name::<R>());
        }
        self
    }

    pub fn contains<R: BatchResolver>(&self) -> bool {
        self.factories.contains_key(&TypeId::of::<R>())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build a new resolver of type `R`
    pub fn build<R: BatchResolver>(&self) -> LoaderResult<R> {
        let factory = self
            .factories
            .get(&TypeId::of::<R>())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LoaderError::FactoryNotRegistered(std::any::type_name::<R>().to_string()))?;

        factory()
            .downcast::<R>()
            .map(|resolver| *resolver)
            .map_err(|_| LoaderError::TypeMismatch {
                identity: "loader factory".to_string(),
                expected: std::any::type_name::<R>().to_string(),
            })
    }
}

impl std::fmt::Debug for LoaderFactories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderFactories")
            .field("registered", &self.factories.len())
            .finish()
    }
}

/// Collectors of one request, keyed by instance identity
pub struct LoaderRegistry {
    scope_id: RwLock<Uuid>,
    config: Arc<LoaderConfig>,
    factories: LoaderFactories,
    collectors: DashMap<String, Arc<dyn ErasedCollector>>,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

impl LoaderRegistry {
    /// Create a registry without registered factories
    pub fn new(config: LoaderConfig) -> Self {
        Self::with_factories(config, LoaderFactories::new())
    }

    /// Create a registry that can build loaders through [`loader`](Self::loader)
    pub fn with_factories(config: LoaderConfig, factories: LoaderFactories) -> Self {
        Self {
            scope_id: RwLock::new(Uuid::new_v4()),
            config: Arc::new(config),
            factories,
            collectors: DashMap::new(),
        }
    }

    /// Id of the current request scope, renewed by [`clear_all`](Self::clear_all)
    pub fn scope_id(&self) -> Uuid {
        *self.scope_id.read()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn factories(&self) -> &LoaderFactories {
        &self.factories
    }

    /// Identity of the collector serving a field path
    pub fn identity_for(&self, path: impl AsRef<[PathSegment]>) -> String {
        instance_identity(self.config.get_namespace(), path.as_ref())
    }

    /// Return the collector for `path`, building its resolver with `factory` if
    /// this is the first access in the current scope
    ///
    /// The factory runs outside the registry's locks and may itself use the
    /// registry.
    pub fn get_or_create<R, F>(
        &self,
        path: impl AsRef<[PathSegment]>,
        factory: F,
    ) -> LoaderResult<Arc<BatchCollector<R>>>
    where
        R: BatchResolver,
        F: FnOnce() -> R,
    {
        let identity = self.identity_for(path);
        if let Some(existing) = self.lookup(&identity) {
            return downcast_collector(&identity, existing);
        }

        let collector: Arc<dyn ErasedCollector> = Arc::new(BatchCollector::with_config(
            identity.clone(),
            factory(),
            Arc::clone(&self.config),
        ));
        let stored = Arc::clone(
            self.collectors
                .entry(identity.clone())
                .or_insert_with(|| Arc::clone(&collector))
                .value(),
        );
        if Arc::ptr_eq(&stored, &collector) {
            tracing::debug!(
                "Created loader '{}' ({}) in scope {}",
                identity,
                std::any::type_name::<R>(),
                self.scope_id()
            );
        }
        downcast_collector(&identity, stored)
    }

    /// Return the collector for `path`, building its resolver through the
    /// registered factories
    pub fn loader<R: BatchResolver>(
        &self,
        path: impl AsRef<[PathSegment]>,
    ) -> LoaderResult<Arc<BatchCollector<R>>> {
        let identity = self.identity_for(path.as_ref());
        if let Some(existing) = self.lookup(&identity) {
            return downcast_collector(&identity, existing);
        }
        let resolver = self.factories.build::<R>()?;
        self.get_or_create(path, move || resolver)
    }

    /// Queue `key` on the collector for `path`
    pub fn load<R: BatchResolver>(
        &self,
        path: impl AsRef<[PathSegment]>,
        key: impl Into<Value>,
        meta: R::Meta,
    ) -> LoaderResult<Deferred<R>> {
        self.loader::<R>(path)?.load(key, meta)
    }

    /// Existing collector for an identity, if any
    pub fn collector<R: BatchResolver>(
        &self,
        identity: &str,
    ) -> LoaderResult<Option<Arc<BatchCollector<R>>>> {
        self.lookup(identity)
            .map(|existing| downcast_collector(identity, existing))
            .transpose()
    }

    fn lookup(&self, identity: &str) -> Option<Arc<dyn ErasedCollector>> {
        self.collectors
            .get(identity)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.collectors.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Identities of live collectors, sorted
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self
            .collectors
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        identities.sort();
        identities
    }

    /// Statistics of every live collector, sorted by identity
    pub fn stats(&self) -> Vec<(String, CollectorStats)> {
        let mut stats: Vec<(String, CollectorStats)> = self
            .collectors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Drop every collector and start a new scope
    ///
    /// Must be called once per completed request. Placeholders still held by the
    /// caller keep their collector alive, but no later lookup reaches it.
    pub fn clear_all(&self) -> usize {
        let abandoned: Vec<String> = self
            .collectors
            .iter()
            .filter(|entry| entry.value().state() == CollectorState::Accumulating)
            .map(|entry| entry.key().clone())
            .collect();
        if !abandoned.is_empty() {
            tracing::warn!(
                "Clearing {} loaders that were never forced: {}",
                abandoned.len(),
                abandoned.join(", ")
            );
        }

        let cleared = self.collectors.len();
        self.collectors.clear();
        let previous = std::mem::replace(&mut *self.scope_id.write(), Uuid::new_v4());
        tracing::debug!("Cleared {} loaders from scope {}", cleared, previous);
        cleared
    }
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("scope_id", &self.scope_id())
            .field("namespace", self.config.get_namespace())
            .field("collectors", &self.collectors.len())
            .finish()
    }
}

fn downcast_collector<R: BatchResolver>(
    identity: &str,
    collector: Arc<dyn ErasedCollector>,
) -> LoaderResult<Arc<BatchCollector<R>>> {
    collector
        .into_any()
        .downcast::<BatchCollector<R>>()
        .map_err(|_| LoaderError::TypeMismatch {
            identity: identity.to_string(),
            expected: std::any::type_name::<R>().to_string(),
        })
}
