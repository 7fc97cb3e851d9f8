use super::*;
use crate::config::LoaderConfigBuilder;
use crate::deferred::force_all;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory user store that records every batch it is asked for
struct UserStore {
    users: HashMap<String, String>,
    calls: AtomicUsize,
    batches: Mutex<Vec<Vec<(Value, String)>>>,
    fail: bool,
    latency: Option<Duration>,
}

impl UserStore {
    fn new() -> Self {
        let users = [("u1", "Ada"), ("u2", "Grace"), ("u3", "Barbara")]
            .into_iter()
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect();
        Self {
            users,
            calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
            fail: false,
            latency: None,
        }
    }

    fn slow(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_batch(&self) -> Vec<(Value, String)> {
        self.batches.lock().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl BatchResolver for UserStore {
    type Meta = String;
    type Value = String;

    async fn resolve(&self, batch: &PendingBatch<String>) -> ResolveResult<BatchResults<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().push(
            batch
                .iter()
                .map(|entry| (entry.key().clone(), entry.meta().clone()))
                .collect(),
        );
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail {
            return Err("connection reset by peer".into());
        }

        let mut results = BatchResults::with_capacity(batch.len());
        for entry in batch.iter() {
            if let Some(name) = entry.key().as_str().and_then(|id| self.users.get(id)) {
                results.insert(entry.canonical().clone(), name.clone());
            }
        }
        Ok(results)
    }
}

fn collector(store: UserStore) -> Arc<BatchCollector<UserStore>> {
    Arc::new(BatchCollector::new("dataloader:post.author", store))
}

#[tokio::test]
async fn test_dedup_keeps_last_metadata_and_resolves_once() {
    let loader = collector(UserStore::new());

    let u1 = loader.load("u1", "first".to_string()).unwrap();
    let u2 = loader.load("u2", "only".to_string()).unwrap();
    let u1_again = loader.load("u1", "second".to_string()).unwrap();

    assert_eq!(u1.force().await.unwrap(), "Ada");
    assert_eq!(loader.resolver().calls(), 1);
    assert_eq!(
        loader.resolver().last_batch(),
        vec![
            (json!("u1"), "second".to_string()),
            (json!("u2"), "only".to_string()),
        ]
    );

    assert_eq!(u2.force().await.unwrap(), "Grace");
    assert_eq!(u1_again.force().await.unwrap(), "Ada");
    assert_eq!(loader.resolver().calls(), 1);
}

#[tokio::test]
async fn test_load_does_not_trigger_resolution() {
    let loader = collector(UserStore::new());
    assert_eq!(loader.state(), CollectorState::Empty);

    let placeholder = loader.load("u1", String::new()).unwrap();
    loader.load("u2", String::new()).unwrap();

    assert_eq!(loader.resolver().calls(), 0);
    assert_eq!(loader.state(), CollectorState::Accumulating);
    assert_eq!(loader.pending_len(), 2);
    assert!(!placeholder.is_ready());

    placeholder.force().await.unwrap();
    assert_eq!(loader.state(), CollectorState::Resolved);
    assert!(placeholder.is_ready());
}

#[tokio::test]
async fn test_forcing_many_placeholders_resolves_once() {
    let loader = collector(UserStore::new());
    let placeholders: Vec<_> = ["u1", "u2", "u3", "u2", "u1"]
        .into_iter()
        .map(|id| loader.load(id, String::new()).unwrap())
        .collect();

    let values = force_all(&placeholders).await;
    let names: Vec<String> = values.into_iter().map(Result::unwrap).collect();
    assert_eq!(names, vec!["Ada", "Grace", "Barbara", "Grace", "Ada"]);

    for placeholder in &placeholders {
        placeholder.force().await.unwrap();
    }
    assert_eq!(loader.resolver().calls(), 1);
    assert_eq!(loader.resolver().last_batch().len(), 3);
}

#[tokio::test]
async fn test_unmapped_key_is_not_found() {
    let loader = collector(UserStore::new());
    let known = loader.load("u1", String::new()).unwrap();
    let unknown = loader.load("nobody", String::new()).unwrap();

    let err = unknown.force().await.unwrap_err();
    assert!(err.is_missing_key());
    assert!(!err.is_fatal());
    assert_eq!(unknown.force_optional().await.unwrap(), None);

    assert_eq!(known.force_optional().await.unwrap(), Some("Ada".to_string()));
    assert_eq!(loader.resolver().calls(), 1);
}

#[tokio::test]
async fn test_resolve_failure_reaches_every_placeholder() {
    let loader = collector(UserStore::failing());
    let u1 = loader.load("u1", String::new()).unwrap();
    let u2 = loader.load("u2", String::new()).unwrap();

    for placeholder in [&u1, &u2, &u1] {
        match placeholder.force().await {
            Err(LoaderError::ResolveFailure { identity, message }) => {
                assert_eq!(identity, "dataloader:post.author");
                assert_eq!(message, "connection reset by peer");
            }
            other => panic!("expected ResolveFailure, got {:?}", other),
        }
    }
    // A failed batch is not retried
    assert_eq!(loader.resolver().calls(), 1);
    assert_eq!(loader.state(), CollectorState::Failed);
    assert!(u2.force_optional().await.is_err());
}

#[tokio::test]
async fn test_load_after_resolution() {
    let loader = collector(UserStore::new());
    let u1 = loader.load("u1", "a".to_string()).unwrap();
    u1.force().await.unwrap();

    // Keys of the sealed batch can still be requested
    let late = loader.load("u1", "ignored".to_string()).unwrap();
    assert_eq!(late.force().await.unwrap(), "Ada");

    // New keys cannot join a batch that already ran
    let err = loader.load("u2", String::new()).unwrap_err();
    assert!(matches!(err, LoaderError::LoadAfterResolve { .. }));
    assert!(err.is_fatal());

    assert_eq!(loader.resolver().calls(), 1);
    assert_eq!(loader.resolver().last_batch(), vec![(json!("u1"), "a".to_string())]);
    assert_eq!(loader.stats().rejected, 1);
}

#[tokio::test]
async fn test_load_many_keeps_input_order() {
    let loader = collector(UserStore::new());
    let placeholders = loader
        .load_many(vec!["u3", "u1", "u3"], "bulk".to_string())
        .unwrap();
    assert_eq!(placeholders.len(), 3);
    assert_eq!(placeholders[0].key(), placeholders[2].key());

    let names: Vec<String> = force_all(&placeholders)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(names, vec!["Barbara", "Ada", "Barbara"]);
    assert_eq!(
        loader.resolver().last_batch(),
        vec![
            (json!("u3"), "bulk".to_string()),
            (json!("u1"), "bulk".to_string()),
        ]
    );
}

#[test]
fn test_invalid_key_is_rejected_at_load_time() {
    let loader = collector(UserStore::new());
    let err = loader.load(json!({"id": "u1"}), String::new()).unwrap_err();
    assert!(matches!(err, LoaderError::InvalidKey(_)));

    let err = loader
        .load_many(vec![json!("u1"), json!(null)], String::new())
        .unwrap_err();
    assert!(matches!(err, LoaderError::InvalidKey(_)));

    // Nothing was queued by the failed calls
    assert_eq!(loader.pending_len(), 0);
    assert_eq!(loader.stats().load_calls, 0);
}

struct Memberships;

#[async_trait]
impl BatchResolver for Memberships {
    type Meta = ();
    type Value = bool;

    async fn resolve(&self, batch: &PendingBatch<()>) -> ResolveResult<BatchResults<bool>> {
        let mut results = BatchResults::new();
        for key in batch.keys() {
            let parts = key.as_array().ok_or("composite key expected")?;
            let is_member = parts[0] == json!("org-1") && parts[1] == json!(7);
            results.insert_key(key, is_member)?;
        }
        Ok(results)
    }
}

#[tokio::test]
async fn test_composite_keys() {
    let loader = Arc::new(BatchCollector::new("dataloader:org.member", Memberships));
    let member = loader.load(json!(["org-1", 7]), ()).unwrap();
    let outsider = loader.load(json!(["org-1", 8]), ()).unwrap();
    let same = loader.load(json!(["org-1", 7]), ()).unwrap();

    assert_eq!(loader.pending_len(), 2);
    assert!(member.await.unwrap());
    assert!(!outsider.await.unwrap());
    assert!(same.await.unwrap());
}

#[tokio::test]
async fn test_non_composite_key_fails_the_whole_batch() {
    let loader = Arc::new(BatchCollector::new("dataloader:org.member", Memberships));
    let scalar = loader.load("org-1", ()).unwrap();
    let err = scalar.await.unwrap_err();
    assert!(matches!(err, LoaderError::ResolveFailure { .. }));
}

#[tokio::test]
async fn test_stats() {
    let loader = collector(UserStore::new());
    for id in ["u1", "u1", "u2", "u1"] {
        loader.load(id, String::new()).unwrap();
    }
    let stats = loader.stats();
    assert_eq!(stats.load_calls, 4);
    assert_eq!(stats.unique_keys, 2);
    assert_eq!(stats.deduplicated, 2);
    assert_eq!(stats.resolve_calls, 0);
    assert!((stats.deduplication_ratio() - 0.5).abs() < f64::EPSILON);

    loader.load("u3", String::new()).unwrap().force().await.unwrap();
    let stats = loader.stats();
    assert_eq!(stats.resolve_calls, 1);
    assert_eq!(stats.forced, 1);
    assert_eq!(stats.fetches_saved(), 4);
    assert_eq!(
        stats.to_string(),
        "BatchCollector Stats: 5 loads, 3 unique keys, 1 resolve calls (40.0% dedup rate)"
    );
    assert_eq!(CollectorStats::default().deduplication_ratio(), 0.0);
}

#[tokio::test]
async fn test_oversized_batch_is_still_resolved_once() {
    let config = LoaderConfigBuilder::new()
        .max_batch_size(Some(2))
        .build_config()
        .unwrap();
    let loader = Arc::new(BatchCollector::with_config(
        "dataloader:post.author",
        UserStore::new(),
        Arc::new(config),
    ));
    let placeholders = loader
        .load_many(["u1", "u2", "u3", "u4"], String::new())
        .unwrap();

    let results = force_all(&placeholders).await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    assert_eq!(loader.resolver().calls(), 1);
    assert_eq!(loader.resolver().last_batch().len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_share_one_resolve() {
    let loader = collector(UserStore::slow(Duration::from_millis(20)));
    let placeholders = loader
        .load_many(["u1", "u2", "u3"], String::new())
        .unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let placeholder = placeholders[i % placeholders.len()].clone();
            tokio::spawn(async move { placeholder.force().await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(loader.resolver().calls(), 1);
    let stats = loader.stats();
    assert_eq!(stats.resolve_calls, 1);
    assert_eq!(stats.forced, 16);
    assert_eq!(loader.state(), CollectorState::Resolved);
}

#[tokio::test]
async fn test_cancelled_force_does_not_rerun_resolve() {
    let loader = collector(UserStore::slow(Duration::from_millis(100)));
    let first = loader.load("u1", String::new()).unwrap();
    let second = loader.load("u2", String::new()).unwrap();

    let timed_out = tokio::time::timeout(Duration::from_millis(20), first.force()).await;
    assert!(timed_out.is_err());
    assert_eq!(loader.state(), CollectorState::Resolving);

    assert_eq!(second.force().await.unwrap(), "Grace");
    assert_eq!(first.force().await.unwrap(), "Ada");
    assert_eq!(loader.resolver().calls(), 1);
    assert_eq!(loader.stats().resolve_calls, 1);
}

#[tokio::test]
async fn test_dropped_spawned_forcer_leaves_the_run_to_others() {
    let loader = collector(UserStore::slow(Duration::from_millis(50)));
    let placeholder = loader.load("u3", String::new()).unwrap();

    let aborted = {
        let placeholder = placeholder.clone();
        tokio::spawn(async move { placeholder.force().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    aborted.abort();
    assert!(aborted.await.unwrap_err().is_cancelled());

    assert_eq!(placeholder.force().await.unwrap(), "Barbara");
    assert_eq!(loader.resolver().calls(), 1);
}

#[test]
fn test_debug_output() {
    let loader = collector(UserStore::new());
    let placeholder = loader.load("u1", String::new()).unwrap();
    let rendered = format!("{:?}", placeholder);
    assert!(rendered.contains("dataloader:post.author"));
    assert!(rendered.contains("s2:u1"));
    assert!(format!("{:?}", loader).contains("Accumulating"));
}
