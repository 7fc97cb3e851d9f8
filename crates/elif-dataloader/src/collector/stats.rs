use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics about a collector's batching
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// Number of `load` calls accepted
    pub load_calls: usize,
    /// Number of distinct keys queued
    pub unique_keys: usize,
    /// Number of `load` calls answered by an already queued key
    pub deduplicated: usize,
    /// Number of times the resolver ran
    pub resolve_calls: usize,
    /// Number of placeholders forced
    pub forced: usize,
    /// Number of `load` calls rejected after resolution began
    pub rejected: usize,
}

impl CollectorStats {
    /// Share of accepted loads that did not add a key to the batch
    pub fn deduplication_ratio(&self) -> f64 {
        if self.load_calls == 0 {
            0.0
        } else {
            self.deduplicated as f64 / self.load_calls as f64
        }
    }

    /// Fetches avoided compared to loading one key at a time
    pub fn fetches_saved(&self) -> usize {
        self.load_calls.saturating_sub(self.resolve_calls)
    }
}

impl Display for CollectorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BatchCollector Stats: {} loads, {} unique keys, {} resolve calls ({:.1}% dedup rate)",
            self.load_calls,
            self.unique_keys,
            self.resolve_calls,
            self.deduplication_ratio() * 100.0
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) load_calls: AtomicUsize,
    pub(crate) unique_keys: AtomicUsize,
    pub(crate) deduplicated: AtomicUsize,
    pub(crate) resolve_calls: AtomicUsize,
    pub(crate) forced: AtomicUsize,
    pub(crate) rejected: AtomicUsize,
}

impl StatsCounters {
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CollectorStats {
        CollectorStats {
            load_calls: self.load_calls.load(Ordering::Relaxed),
            unique_keys: self.unique_keys.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            resolve_calls: self.resolve_calls.load(Ordering::Relaxed),
            forced: self.forced.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
