//! # Fuzzy Watch Registry
//!
//! Entry point of the push engine. Connection handling calls `watch`,
//! `unwatch` and `on_client_disconnect`; the naming registry calls
//! `on_service_changed`. Both sides are fire-and-forget: delivery outcomes are
//! handled by the push tasks and never surface to the caller.
//!
//! A new watch enqueues an init sync of every known matching key. A service
//! change enqueues one change notification per (matching pattern, watching
//! client). `resync` reconciles each binding's acknowledged keys against the
//! current index and pushes the difference, which eventually repairs any
//! change notification that was dropped.

use meridian_core::{ChangeType, ClientId, Pattern, PushExecutor, ServiceKey, SyncContext, SyncType};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::bindings::WatchBindings;
use crate::config::PushConfig;
use crate::engine::{EngineOptions, TaskEngine};
use crate::errors::{Result, WatchError};
use crate::pattern_index::PatternIndex;
use crate::tasks::{
    ChangeNotifyTask, PushContext, PushTask, PushTaskKey, PushTaskProcessor, SyncNotifyTask,
};

/// Result of registering a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOutcome {
    /// Number of service keys scheduled for the initial (or diff) sync.
    pub matched: usize,
    /// Whether the matching set was cut at `max_matched_services_per_pattern`.
    pub truncated: bool,
}

pub struct FuzzyWatchRegistry {
    config: PushConfig,
    index: Arc<PatternIndex>,
    bindings: Arc<WatchBindings>,
    engine: TaskEngine<PushTask>,
    processor: Arc<PushTaskProcessor>,
}

impl FuzzyWatchRegistry {
    /// Build the registry. Must be called from within a tokio runtime, which
    /// later drives every push deadline.
    pub fn new(config: PushConfig, executor: Arc<dyn PushExecutor>) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| WatchError::NoRuntime)?;

        let index = Arc::new(PatternIndex::new());
        let bindings = Arc::new(WatchBindings::new(Arc::clone(&index)));
        let engine = TaskEngine::new(
            "fuzzy-watch-push",
            EngineOptions {
                process_interval: config.process_interval(),
                max_concurrent_tasks: config.max_concurrent_tasks,
            },
        );
        let processor = Arc::new(PushTaskProcessor::new(Arc::new(PushContext {
            executor,
            bindings: Arc::clone(&bindings),
            config: config.clone(),
            runtime,
        })));

        Ok(Self {
            config,
            index,
            bindings,
            engine,
            processor,
        })
    }

    /// Start dispatching push tasks. Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.engine.start(self.processor.clone());
    }

    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    pub fn index(&self) -> &PatternIndex {
        &self.index
    }

    pub fn bindings(&self) -> &WatchBindings {
        &self.bindings
    }

    pub fn engine(&self) -> &TaskEngine<PushTask> {
        &self.engine
    }

    /// Bind `client_id` to `pattern` and schedule an init sync of every known
    /// matching service.
    pub fn watch(&self, client_id: &ClientId, pattern: Pattern) -> Result<WatchOutcome> {
        self.bind(client_id, &pattern)?;

        let (keys, truncated) = self.matching_keys(&pattern);
        let outcome = WatchOutcome {
            matched: keys.len(),
            truncated,
        };
        self.engine.add_task(
            SyncNotifyTask::init(
                client_id.clone(),
                pattern.clone(),
                keys,
                self.config.sync_notify_delay(),
            )
            .into(),
        )?;

        info!(client_id = %client_id, pattern = %pattern, matched = outcome.matched, "fuzzy watch registered");
        Ok(outcome)
    }

    /// Bind a reconnecting client that already holds `known` keys for
    /// `pattern`, and schedule a diff sync of only what it is missing or
    /// holds in excess. An empty diff schedules nothing.
    pub fn watch_with_known(
        &self,
        client_id: &ClientId,
        pattern: Pattern,
        known: impl IntoIterator<Item = ServiceKey>,
    ) -> Result<WatchOutcome> {
        self.bind(client_id, &pattern)?;

        let known: HashSet<ServiceKey> = known.into_iter().collect();
        let (expected, truncated) = self.matching_keys(&pattern);
        let live = self.index.match_service_keys(&pattern);
        let diff = diff_contexts(&expected, &live, &known);
        self.bindings.replace_synced(client_id, &pattern, known);

        let outcome = WatchOutcome {
            matched: diff.len(),
            truncated,
        };
        if !diff.is_empty() {
            self.engine.add_task(
                SyncNotifyTask::new(
                    client_id.clone(),
                    pattern.clone(),
                    SyncType::DiffSyncNotify,
                    diff,
                    self.config.sync_notify_delay(),
                )
                .into(),
            )?;
        }

        info!(client_id = %client_id, pattern = %pattern, diff = outcome.matched, "fuzzy watch re-registered");
        Ok(outcome)
    }

    fn bind(&self, client_id: &ClientId, pattern: &Pattern) -> Result<()> {
        if self.engine.is_stopped() {
            return Err(WatchError::EngineStopped);
        }
        if let Err(e) = self
            .bindings
            .bind(client_id, pattern, self.config.max_patterns_per_client)
        {
            warn!(client_id = %client_id, pattern = %pattern, error = %e, "fuzzy watch rejected");
            return Err(e);
        }
        Ok(())
    }

    /// Known keys matched by `pattern`, cut at the per-pattern limit.
    fn matching_keys(&self, pattern: &Pattern) -> (BTreeSet<ServiceKey>, bool) {
        let mut keys = self.index.match_service_keys(pattern);
        let limit = self.config.max_matched_services_per_pattern;
        if keys.len() <= limit {
            return (keys, false);
        }
        warn!(
            pattern = %pattern,
            matched = keys.len(),
            limit,
            "fuzzy watch matches too many services, truncating sync"
        );
        keys = keys.into_iter().take(limit).collect();
        (keys, true)
    }

    /// Remove one binding and cancel its pending pushes.
    pub fn unwatch(&self, client_id: &ClientId, pattern: &Pattern) -> bool {
        if !self.bindings.unbind(client_id, pattern) {
            return false;
        }
        self.engine.remove_task(&PushTaskKey::ChangeNotify {
            pattern: pattern.clone(),
            client_id: client_id.clone(),
        });
        self.engine.remove_task(&PushTaskKey::SyncNotify {
            client_id: client_id.clone(),
            pattern: pattern.clone(),
        });
        info!(client_id = %client_id, pattern = %pattern, "fuzzy watch removed");
        true
    }

    /// Drop every binding of a gone client and cancel its pending pushes.
    /// Returns the number of bindings removed.
    pub fn on_client_disconnect(&self, client_id: &ClientId) -> usize {
        let patterns = self.bindings.remove_client(client_id);
        let cancelled = self
            .engine
            .remove_where(|key, _| key.client_id() == client_id);
        if !patterns.is_empty() || cancelled > 0 {
            info!(
                client_id = %client_id,
                bindings = patterns.len(),
                cancelled,
                "client disconnected, fuzzy watches released"
            );
        }
        patterns.len()
    }

    /// Fan a service change out to every client watching a matching pattern.
    /// Returns the number of change notifications submitted.
    pub fn on_service_changed(&self, service_key: &ServiceKey, change_type: ChangeType) -> usize {
        if change_type != ChangeType::Deleted {
            self.index.add_service(service_key);
        }
        let patterns = self.index.match_patterns(service_key);
        if change_type == ChangeType::Deleted {
            self.index.remove_service(service_key);
        }

        let mut submitted = 0;
        for pattern in patterns {
            for client_id in self.bindings.clients_of(&pattern) {
                let task = ChangeNotifyTask::new(
                    pattern.clone(),
                    client_id,
                    service_key.clone(),
                    change_type,
                    self.config.change_notify_delay(),
                );
                if let Err(e) = self.engine.add_task(task.into()) {
                    warn!(service_key = %service_key, error = %e, "service change not fanned out");
                    return submitted;
                }
                submitted += 1;
            }
        }
        debug!(service_key = %service_key, change_type = %change_type, submitted, "service change fanned out");
        submitted
    }

    /// Seed the key inventory without notifying anyone, e.g. at startup.
    pub fn sync_services(&self, keys: impl IntoIterator<Item = ServiceKey>) -> usize {
        keys.into_iter()
            .filter(|key| self.index.add_service(key))
            .count()
    }

    /// Reconcile every binding's acknowledged keys with the current index and
    /// schedule a diff sync where they disagree. Returns the number of diff
    /// syncs submitted.
    pub fn resync(&self) -> usize {
        let mut submitted = 0;
        for (client_id, pattern) in self.bindings.all_bindings() {
            let Some(synced) = self.bindings.synced_keys(&client_id, &pattern) else {
                continue;
            };
            let (expected, _) = self.matching_keys(&pattern);
            let live = self.index.match_service_keys(&pattern);
            let diff = diff_contexts(&expected, &live, &synced);
            if diff.is_empty() {
                continue;
            }
            debug!(client_id = %client_id, pattern = %pattern, diff = diff.len(), "binding out of sync");
            let task = SyncNotifyTask::new(
                client_id,
                pattern,
                SyncType::DiffSyncNotify,
                diff,
                self.config.sync_notify_delay(),
            );
            if let Err(e) = self.engine.add_task(task.into()) {
                warn!(error = %e, "fuzzy watch resync aborted");
                break;
            }
            submitted += 1;
        }
        submitted
    }

    /// Stop the push engine, dropping pending pushes. Returns how many were dropped.
    pub async fn shutdown(&self) -> usize {
        self.engine.shutdown().await
    }
}

/// `ADDED` for keys within the limit that the client lacks, `DELETED` for held
/// keys that no longer match at all. A live key cut by the limit is left alone.
fn diff_contexts(
    expected: &BTreeSet<ServiceKey>,
    live: &BTreeSet<ServiceKey>,
    held: &HashSet<ServiceKey>,
) -> Vec<SyncContext> {
    let added = expected
        .iter()
        .filter(|key| !held.contains(*key))
        .cloned()
        .map(SyncContext::added);
    let deleted = held
        .iter()
        .filter(|key| !live.contains(*key))
        .cloned()
        .map(SyncContext::deleted);
    added.chain(deleted).collect()
}

#[cfg(test)]
#[path = "watch_registry_test.rs"]
mod tests;
