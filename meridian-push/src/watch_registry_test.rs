//! # Fuzzy Watch Registry Tests
//!
//! Drive the registry end to end against an in-memory executor that answers
//! every push synchronously, optionally failing the next pushes with scripted
//! errors.

use std::collections::VecDeque;
use std::sync::Arc;

use meridian_core::{
    ChangeType, ClientId, Pattern, PushCallback, PushError, PushExecutor, PushRequest, ServiceKey,
    SyncContext, SyncType,
};
use parking_lot::Mutex;
use tokio::time::{sleep, Duration};

use super::{FuzzyWatchRegistry, WatchOutcome};
use crate::config::PushConfig;
use crate::errors::WatchError;

#[derive(Default)]
struct ScriptedExecutor {
    sent: Mutex<Vec<(ClientId, PushRequest)>>,
    failures: Mutex<VecDeque<PushError>>,
}

impl ScriptedExecutor {
    fn fail_next(&self, error: PushError) {
        self.failures.lock().push_back(error);
    }

    fn take_sent(&self) -> Vec<(ClientId, PushRequest)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl PushExecutor for ScriptedExecutor {
    fn push_with_callback(
        &self,
        client_id: &ClientId,
        request: PushRequest,
        callback: Box<dyn PushCallback>,
    ) {
        self.sent.lock().push((client_id.clone(), request));
        let failure = self.failures.lock().pop_front();
        match failure {
            Some(error) => callback.on_fail(error),
            None => callback.on_success(),
        }
    }
}

fn config() -> PushConfig {
    PushConfig {
        sync_batch_size: 2,
        process_interval_ms: 10,
        push_task_retry_delay_ms: 100,
        push_task_timeout_ms: 1_000,
        ..Default::default()
    }
}

fn setup(config: PushConfig) -> (Arc<ScriptedExecutor>, FuzzyWatchRegistry) {
    let executor = Arc::new(ScriptedExecutor::default());
    let registry = FuzzyWatchRegistry::new(config, executor.clone()).unwrap();
    registry.start();
    (executor, registry)
}

fn pattern(expr: &str) -> Pattern {
    Pattern::new("public", expr).unwrap()
}

fn key(group: &str, name: &str) -> ServiceKey {
    ServiceKey::new("public", group, name)
}

fn sync_summary(sent: &[(ClientId, PushRequest)]) -> Vec<(SyncType, usize, usize, usize)> {
    sent.iter()
        .filter_map(|(_, request)| match request {
            PushRequest::Sync(sync) => Some((
                sync.sync_type,
                sync.current_batch,
                sync.total_batch,
                sync.contexts.len(),
            )),
            PushRequest::ChangeNotify(_) => None,
        })
        .collect()
}

/// A new watch pushes the matching set in 0-based batches, then the finish marker.
#[tokio::test(start_paused = true)]
async fn watch_pushes_init_batches_then_finish() {
    let (executor, registry) = setup(config());
    registry.sync_services([
        key("group1", "svcA"),
        key("group1", "svcB"),
        key("group1", "svcC"),
        key("group2", "svcA"),
    ]);
    let c1 = ClientId::from("c1");

    let outcome = registry.watch(&c1, pattern("group1.*")).unwrap();
    assert_eq!(
        outcome,
        WatchOutcome {
            matched: 3,
            truncated: false
        }
    );
    sleep(Duration::from_millis(100)).await;

    assert_eq!(
        sync_summary(&executor.take_sent()),
        vec![
            (SyncType::InitNotify, 0, 2, 2),
            (SyncType::InitNotify, 1, 2, 1),
            (SyncType::FinishInitNotify, 0, 0, 0),
        ]
    );
    assert_eq!(
        registry
            .bindings()
            .synced_keys(&c1, &pattern("group1.*"))
            .unwrap()
            .len(),
        3
    );
}

/// A pattern without matches sends only the finish marker.
#[tokio::test(start_paused = true)]
async fn empty_watch_sends_only_finish() {
    let (executor, registry) = setup(config());
    registry.watch(&ClientId::from("c1"), pattern("nothing.*")).unwrap();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(
        sync_summary(&executor.take_sent()),
        vec![(SyncType::FinishInitNotify, 0, 0, 0)]
    );
}

/// A service change reaches every client watching any matching pattern.
#[tokio::test(start_paused = true)]
async fn service_change_fans_out_to_watchers() {
    let (executor, registry) = setup(config());
    let (c1, c2, c3) = (ClientId::from("c1"), ClientId::from("c2"), ClientId::from("c3"));
    registry.watch(&c1, pattern("group1.*")).unwrap();
    registry.watch(&c2, pattern("group1.**")).unwrap();
    registry.watch(&c3, pattern("group2.*")).unwrap();
    sleep(Duration::from_millis(100)).await;
    executor.take_sent();

    let submitted = registry.on_service_changed(&key("group1", "svcA"), ChangeType::Added);
    assert_eq!(submitted, 2);
    sleep(Duration::from_millis(100)).await;

    let mut notified: Vec<String> = executor
        .take_sent()
        .into_iter()
        .map(|(client_id, request)| match request {
            PushRequest::ChangeNotify(change) => {
                assert_eq!(change.service_key, key("group1", "svcA"));
                assert_eq!(change.change_type, ChangeType::Added);
                format!("{client_id}:{}", change.pattern)
            }
            PushRequest::Sync(_) => panic!("unexpected sync push"),
        })
        .collect();
    notified.sort();
    assert_eq!(notified, ["c1:public>>group1.*", "c2:public>>group1.**"]);
    assert!(registry
        .index()
        .match_service_keys(&pattern("group1.*"))
        .contains(&key("group1", "svcA")));
}

/// Unwatching cancels the binding's pending pushes.
#[tokio::test(start_paused = true)]
async fn unwatch_cancels_pending_pushes() {
    let (executor, registry) = setup(PushConfig {
        change_notify_delay_ms: 500,
        ..config()
    });
    let c1 = ClientId::from("c1");
    let p = pattern("group1.*");
    registry.watch(&c1, p.clone()).unwrap();
    sleep(Duration::from_millis(100)).await;
    executor.take_sent();

    registry.on_service_changed(&key("group1", "svcA"), ChangeType::Added);
    assert_eq!(registry.engine().pending_len(), 1);
    assert!(registry.unwatch(&c1, &p));
    assert!(!registry.unwatch(&c1, &p));
    assert_eq!(registry.engine().pending_len(), 0);

    sleep(Duration::from_secs(1)).await;
    assert!(executor.take_sent().is_empty());
}

/// A client cannot watch more than the configured number of patterns.
#[tokio::test(start_paused = true)]
async fn watch_rejects_patterns_over_limit() {
    let (_, registry) = setup(PushConfig {
        max_patterns_per_client: 1,
        ..config()
    });
    let c1 = ClientId::from("c1");
    registry.watch(&c1, pattern("a.*")).unwrap();
    registry.watch(&c1, pattern("a.*")).unwrap();

    let err = registry.watch(&c1, pattern("b.*")).unwrap_err();
    assert!(matches!(err, WatchError::PatternOverLimit { limit: 1, .. }));
}

/// The initial sync is cut at the per-pattern limit, in key order.
#[tokio::test(start_paused = true)]
async fn init_sync_is_truncated_at_limit() {
    let (executor, registry) = setup(PushConfig {
        max_matched_services_per_pattern: 3,
        sync_batch_size: 10,
        ..config()
    });
    registry.sync_services((0..5).map(|i| key("group1", &format!("svc{i}"))));

    let outcome = registry.watch(&ClientId::from("c1"), pattern("group1.*")).unwrap();
    assert_eq!(
        outcome,
        WatchOutcome {
            matched: 3,
            truncated: true
        }
    );
    sleep(Duration::from_millis(100)).await;

    let sent = executor.take_sent();
    let PushRequest::Sync(first) = &sent[0].1 else {
        panic!("expected a sync push");
    };
    let names: Vec<&str> = first.contexts.iter().map(|c| c.service_key.name.as_str()).collect();
    assert_eq!(names, ["svc0", "svc1", "svc2"]);
}

/// A live service beyond the limit that the client learned of through a
/// change notification is not withdrawn by a resync.
#[tokio::test(start_paused = true)]
async fn resync_keeps_live_service_beyond_limit() {
    let (executor, registry) = setup(PushConfig {
        max_matched_services_per_pattern: 2,
        sync_batch_size: 10,
        ..config()
    });
    registry.sync_services([key("group1", "a"), key("group1", "b"), key("group1", "c")]);
    let c1 = ClientId::from("c1");
    registry.watch(&c1, pattern("group1.*")).unwrap();
    sleep(Duration::from_millis(100)).await;

    registry.on_service_changed(&key("group1", "c"), ChangeType::Modified);
    sleep(Duration::from_millis(100)).await;
    executor.take_sent();

    assert_eq!(registry.resync(), 0);
    sleep(Duration::from_millis(100)).await;
    assert!(executor.take_sent().is_empty());

    // Once gone from the index, the service is withdrawn.
    registry.index().remove_service(&key("group1", "c"));
    assert_eq!(registry.resync(), 1);
    sleep(Duration::from_millis(100)).await;
    let sent = executor.take_sent();
    let PushRequest::Sync(diff) = &sent[0].1 else {
        panic!("expected a sync push");
    };
    assert_eq!(diff.contexts, vec![SyncContext::deleted(key("group1", "c"))]);
}

/// A reconnecting client only receives what it is missing or holds in excess.
#[tokio::test(start_paused = true)]
async fn watch_with_known_pushes_only_the_diff() {
    let (executor, registry) = setup(PushConfig {
        sync_batch_size: 10,
        ..config()
    });
    registry.sync_services([key("group1", "svcA"), key("group1", "svcB")]);
    let c1 = ClientId::from("c1");

    let outcome = registry
        .watch_with_known(
            &c1,
            pattern("group1.*"),
            [key("group1", "svcA"), key("group1", "gone")],
        )
        .unwrap();
    assert_eq!(outcome.matched, 2);
    sleep(Duration::from_millis(100)).await;

    let sent = executor.take_sent();
    assert_eq!(sent.len(), 1);
    let PushRequest::Sync(diff) = &sent[0].1 else {
        panic!("expected a sync push");
    };
    assert_eq!(diff.sync_type, SyncType::DiffSyncNotify);
    assert_eq!(
        diff.contexts,
        vec![
            SyncContext::deleted(key("group1", "gone")),
            SyncContext::added(key("group1", "svcB")),
        ]
    );

    // Already converged: nothing to push.
    let synced = registry.bindings().synced_keys(&c1, &pattern("group1.*")).unwrap();
    assert_eq!(
        registry
            .watch_with_known(&c1, pattern("group1.*"), synced)
            .unwrap()
            .matched,
        0
    );
}

/// A change dropped on a terminal failure is repaired by the next resync.
#[tokio::test(start_paused = true)]
async fn resync_repairs_dropped_change() {
    let (executor, registry) = setup(config());
    let c1 = ClientId::from("c1");
    registry.watch(&c1, pattern("group1.*")).unwrap();
    sleep(Duration::from_millis(100)).await;
    executor.take_sent();

    executor.fail_next(PushError::NoRetryRequired("client busy".into()));
    registry.on_service_changed(&key("group1", "svcA"), ChangeType::Added);
    sleep(Duration::from_millis(500)).await;
    assert_eq!(executor.take_sent().len(), 1);
    assert_eq!(registry.engine().pending_len(), 0);

    assert_eq!(registry.resync(), 1);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        sync_summary(&executor.take_sent()),
        vec![(SyncType::DiffSyncNotify, 0, 1, 1)]
    );
    assert!(registry
        .bindings()
        .synced_keys(&c1, &pattern("group1.*"))
        .unwrap()
        .contains(&key("group1", "svcA")));

    // Converged bindings produce no further work.
    assert_eq!(registry.resync(), 0);
}

/// A retryable change failure is delivered again after the retry delay.
#[tokio::test(start_paused = true)]
async fn retryable_change_failure_is_retried() {
    let (executor, registry) = setup(config());
    let c1 = ClientId::from("c1");
    registry.watch(&c1, pattern("group1.*")).unwrap();
    sleep(Duration::from_millis(100)).await;
    executor.take_sent();

    executor.fail_next(PushError::Transport("connection reset".into()));
    registry.on_service_changed(&key("group1", "svcA"), ChangeType::Added);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(executor.take_sent().len(), 1);

    sleep(Duration::from_millis(200)).await;
    let retried = executor.take_sent();
    assert_eq!(retried.len(), 1);
    assert!(matches!(
        &retried[0].1,
        PushRequest::ChangeNotify(change) if change.service_key == key("group1", "svcA")
    ));
}

/// A disconnect releases every binding, and the pattern stops matching.
#[tokio::test(start_paused = true)]
async fn disconnect_releases_bindings() {
    let (executor, registry) = setup(config());
    let c1 = ClientId::from("c1");
    registry.watch(&c1, pattern("group1.*")).unwrap();
    registry.watch(&c1, pattern("group2.*")).unwrap();
    sleep(Duration::from_millis(100)).await;
    executor.take_sent();

    assert_eq!(registry.on_client_disconnect(&c1), 2);
    assert_eq!(
        registry.on_service_changed(&key("group1", "svcA"), ChangeType::Added),
        0
    );
    assert_eq!(registry.bindings().binding_count(), 0);
}

/// After shutdown new watches are rejected.
#[tokio::test(start_paused = true)]
async fn shutdown_rejects_new_watches() {
    let (_, registry) = setup(config());
    registry.shutdown().await;
    assert!(matches!(
        registry.watch(&ClientId::from("c1"), pattern("group1.*")),
        Err(WatchError::EngineStopped)
    ));
}

#[test]
fn invalid_config_is_rejected() {
    let executor = Arc::new(ScriptedExecutor::default());
    let result = FuzzyWatchRegistry::new(
        PushConfig {
            sync_batch_size: 0,
            ..Default::default()
        },
        executor,
    );
    assert!(matches!(result, Err(WatchError::InvalidConfig(_))));
}

#[test]
fn registry_outside_runtime_is_rejected() {
    let executor = Arc::new(ScriptedExecutor::default());
    let result = FuzzyWatchRegistry::new(PushConfig::default(), executor);
    assert!(matches!(result, Err(WatchError::NoRuntime)));
}
