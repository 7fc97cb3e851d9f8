use crate::key::{encode, CanonicalKey};
use crate::LoaderResult;
use serde_json::Value;
use std::collections::HashMap;

/// One queued key together with the metadata of its latest `load` call
#[derive(Debug, Clone)]
pub struct PendingEntry<M> {
    canonical: CanonicalKey,
    key: Value,
    meta: M,
}

impl<M> PendingEntry<M> {
    /// The key as it was passed to `load`
    pub fn key(&self) -> &Value {
        &self.key
    }

    pub fn canonical(&self) -> &CanonicalKey {
        &self.canonical
    }

    pub fn meta(&self) -> &M {
        &self.meta
    }

    pub fn into_parts(self) -> (CanonicalKey, Value, M) {
        (self.canonical, self.key, self.meta)
    }
}

/// Deduplicated keys handed to a resolver, in first-load order
#[derive(Debug, Clone)]
pub struct PendingBatch<M> {
    order: Vec<CanonicalKey>,
    entries: HashMap<CanonicalKey, PendingEntry<M>>,
}

impl<M> Default for PendingBatch<M> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }
}

impl<M> PendingBatch<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a key, overwriting the metadata of an already queued one.
    /// Returns `true` if the key was not queued before.
    pub(crate) fn upsert(&mut self, canonical: CanonicalKey, key: Value, meta: M) -> bool {
        match self.entries.get_mut(&canonical) {
            Some(entry) => {
                entry.meta = meta;
                false
            }
            None => {
                self.order.push(canonical.clone());
                self.entries.insert(
                    canonical.clone(),
                    PendingEntry {
                        canonical,
                        key,
                        meta,
                    },
                );
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, canonical: &CanonicalKey) -> bool {
        self.entries.contains_key(canonical)
    }

    pub fn get(&self, canonical: &CanonicalKey) -> Option<&PendingEntry<M>> {
        self.entries.get(canonical)
    }

    /// Look up an entry by its original key
    pub fn get_key(&self, key: &Value) -> Option<&PendingEntry<M>> {
        encode(key).ok().and_then(|canonical| self.entries.get(&canonical))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingEntry<M>> + '_ {
        self.order.iter().filter_map(move |k| self.entries.get(k))
    }

    /// Original keys in first-load order
    pub fn keys(&self) -> impl Iterator<Item = &Value> + '_ {
        self.iter().map(|entry| &entry.key)
    }

    pub fn canonical_keys(&self) -> &[CanonicalKey] {
        &self.order
    }
}

/// Values produced by a resolver, keyed by canonical key
///
/// Keys without an entry are reported as "not found" to the placeholders that
/// ask for them.
#[derive(Debug, Clone)]
pub struct BatchResults<V> {
    values: HashMap<CanonicalKey, V>,
}

impl<V> Default for BatchResults<V> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
        }
    }
}

impl<V> BatchResults<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: HashMap::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, canonical: CanonicalKey, value: V) -> Option<V> {
        self.values.insert(canonical, value)
    }

    /// Insert by original key, encoding it first
    pub fn insert_key(&mut self, key: &Value, value: V) -> LoaderResult<Option<V>> {
        Ok(self.values.insert(encode(key)?, value))
    }

    pub fn get(&self, canonical: &CanonicalKey) -> Option<&V> {
        self.values.get(canonical)
    }

    pub fn contains(&self, canonical: &CanonicalKey) -> bool {
        self.values.contains_key(canonical)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalKey, &V)> + '_ {
        self.values.iter()
    }
}

impl<V> FromIterator<(CanonicalKey, V)> for BatchResults<V> {
    fn from_iter<I: IntoIterator<Item = (CanonicalKey, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl<V> Extend<(CanonicalKey, V)> for BatchResults<V> {
    fn extend<I: IntoIterator<Item = (CanonicalKey, V)>>(&mut self, iter: I) {
        self.values.extend(iter);
    }
}

impl<V> From<HashMap<CanonicalKey, V>> for BatchResults<V> {
    fn from(values: HashMap<CanonicalKey, V>) -> Self {
        Self { values }
    }
}
