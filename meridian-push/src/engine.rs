//! # Delay Task Engine
//!
//! Payload-agnostic scheduler for deferred, mergeable units of work.
//!
//! # Behavior
//!
//! - **Merge on submit**: `add_task` folds a task into the pending entry with the
//!   same dedup key instead of queueing a second one. The pending entry keeps
//!   its earliest deadline, so a burst of submissions still flushes promptly.
//! - **Remove-for-dispatch**: the scheduler removes a ready task from the pending
//!   map with a predicate-checked removal. Once removed, the task is owned by its
//!   execution and can no longer absorb merges; a later `add_task` for the same
//!   key starts a fresh pending entry.
//! - **At most one in-flight execution per key**: a fresh pending entry is not
//!   dispatched while an earlier execution for the same key is still running,
//!   including any [`Outstanding`] work it returned.
//! - **Bounded hand-off**: `max_concurrent_tasks` bounds running `process`
//!   calls only. Outstanding work waits without a permit, so slow replies of
//!   some keys never stall dispatch of the others.
//! - **Failure policy stays with the task**: the engine never retries. A task
//!   that wants another attempt re-submits itself through `add_task`.
//!
//! # Shutdown
//!
//! `shutdown()` rejects further submissions, stops the scheduler loop and drops
//! every pending task. Executions already handed to the pool run to completion.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::errors::{Result, WatchError};
use crate::push_metrics::{
    PUSH_PENDING_TASKS, PUSH_TASKS_DISPATCHED_TOTAL, PUSH_TASKS_ENQUEUED_TOTAL,
    PUSH_TASKS_MERGED_TOTAL,
};

/// A deferred unit of work identified by a dedup key.
pub trait DelayTask: Sized + Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;

    /// Earliest instant at which the task may be dispatched.
    fn ready_at(&self) -> Instant;

    /// Fold a newly submitted task with the same key into this pending one.
    fn merge(&mut self, newer: Self);
}

/// Work that outlives the hand-off of a task, such as replies not yet
/// received. The task key stays in flight until it resolves, while the
/// concurrency permit is already released.
pub type Outstanding = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Executes tasks handed over by the engine scheduler.
#[async_trait]
pub trait TaskProcessor<T: DelayTask>: Send + Sync + 'static {
    /// Run `task`. The returned future, if any, keeps the key in flight
    /// without holding one of the `max_concurrent_tasks` permits.
    async fn process(&self, task: T, engine: TaskEngine<T>) -> Option<Outstanding>;
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub process_interval: Duration,
    pub max_concurrent_tasks: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            process_interval: Duration::from_millis(100),
            max_concurrent_tasks: 64,
        }
    }
}

struct Shared<T: DelayTask> {
    name: String,
    pending: DashMap<T::Key, T>,
    in_flight: DashSet<T::Key>,
    stopped: AtomicBool,
    shutdown: CancellationToken,
    wakeup: Notify,
    permits: Arc<Semaphore>,
    process_interval: Duration,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

/// Cheaply cloneable handle to a delay task engine.
pub struct TaskEngine<T: DelayTask> {
    shared: Arc<Shared<T>>,
}

impl<T: DelayTask> Clone for TaskEngine<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: DelayTask> TaskEngine<T> {
    pub fn new(name: impl Into<String>, options: EngineOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                pending: DashMap::new(),
                in_flight: DashSet::new(),
                stopped: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                wakeup: Notify::new(),
                permits: Arc::new(Semaphore::new(options.max_concurrent_tasks.max(1))),
                process_interval: options.process_interval,
                scheduler: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Submit a task, merging it into a pending task with the same key if one exists.
    pub fn add_task(&self, task: T) -> Result<()> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(WatchError::EngineStopped);
        }

        match self.shared.pending.entry(task.key()) {
            Entry::Occupied(mut existing) => {
                trace!(engine = %self.shared.name, key = ?existing.key(), "merging into pending delay task");
                existing.get_mut().merge(task);
                counter!(PUSH_TASKS_MERGED_TOTAL.name, "engine" => self.shared.name.clone())
                    .increment(1);
            }
            Entry::Vacant(slot) => {
                trace!(engine = %self.shared.name, key = ?slot.key(), "new pending delay task");
                slot.insert(task);
                counter!(PUSH_TASKS_ENQUEUED_TOTAL.name, "engine" => self.shared.name.clone())
                    .increment(1);
            }
        }

        self.shared.wakeup.notify_one();
        Ok(())
    }

    pub fn remove_task(&self, key: &T::Key) -> Option<T> {
        self.shared.pending.remove(key).map(|(_, task)| task)
    }

    /// Drop every pending task matching `predicate`, returning how many were removed.
    pub fn remove_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&T::Key, &T) -> bool,
    {
        let mut removed = 0;
        self.shared.pending.retain(|key, task| {
            if predicate(key, task) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn is_pending(&self, key: &T::Key) -> bool {
        self.shared.pending.contains_key(key)
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.shared.in_flight.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Spawn the scheduler loop. Calling it twice is a no-op.
    pub fn start(&self, processor: Arc<dyn TaskProcessor<T>>) {
        let mut scheduler = self.shared.scheduler.lock();
        if scheduler.is_some() || self.is_stopped() {
            warn!(engine = %self.shared.name, "delay task engine already started or stopped");
            return;
        }
        let engine = self.clone();
        *scheduler = Some(tokio::spawn(async move {
            engine.run_scheduler(processor).await;
        }));
        info!(engine = %self.shared.name, "delay task engine started");
    }

    /// Stop scheduling and drop all pending tasks. Returns the number dropped.
    pub async fn shutdown(&self) -> usize {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return 0;
        }
        self.shared.shutdown.cancel();

        let handle = self.shared.scheduler.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(engine = %self.shared.name, error = %e, "delay task scheduler exited abnormally");
            }
        }

        let dropped = self.shared.pending.len();
        self.shared.pending.clear();
        gauge!(PUSH_PENDING_TASKS.name, "engine" => self.shared.name.clone()).set(0.0);
        info!(engine = %self.shared.name, dropped, "delay task engine stopped");
        dropped
    }

    async fn run_scheduler(self, processor: Arc<dyn TaskProcessor<T>>) {
        loop {
            tokio::select! {
                _ = self.shared.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.shared.process_interval) => {}
                _ = self.shared.wakeup.notified() => {}
            }

            if !self.dispatch_ready(&processor).await {
                break;
            }
        }
        trace!(engine = %self.shared.name, "delay task scheduler loop exited");
    }

    /// Hand every ready task to the execution pool. Returns false on shutdown.
    async fn dispatch_ready(&self, processor: &Arc<dyn TaskProcessor<T>>) -> bool {
        let now = Instant::now();
        let ready: Vec<T::Key> = self
            .shared
            .pending
            .iter()
            .filter(|entry| {
                entry.value().ready_at() <= now && !self.shared.in_flight.contains(entry.key())
            })
            .map(|entry| entry.key().clone())
            .collect();

        for key in ready {
            let permit = tokio::select! {
                _ = self.shared.shutdown.cancelled() => return false,
                permit = Arc::clone(&self.shared.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return false,
                },
            };

            // The entry may have been cancelled since the scan.
            let Some((key, task)) = self
                .shared
                .pending
                .remove_if(&key, |_, task| task.ready_at() <= now)
            else {
                continue;
            };

            self.shared.in_flight.insert(key.clone());
            counter!(PUSH_TASKS_DISPATCHED_TOTAL.name, "engine" => self.shared.name.clone())
                .increment(1);

            let guard = InFlightGuard {
                engine: self.clone(),
                key,
            };
            let processor = Arc::clone(processor);
            tokio::spawn(async move {
                let outstanding = processor.process(task, guard.engine.clone()).await;
                drop(permit);
                if let Some(outstanding) = outstanding {
                    outstanding.await;
                }
                drop(guard);
            });
        }

        gauge!(PUSH_PENDING_TASKS.name, "engine" => self.shared.name.clone())
            .set(self.shared.pending.len() as f64);
        true
    }
}

/// Clears the in-flight marker of a key even if the processor panics.
struct InFlightGuard<T: DelayTask> {
    engine: TaskEngine<T>,
    key: T::Key,
}

impl<T: DelayTask> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        self.engine.shared.in_flight.remove(&self.key);
        // A pending entry for the same key may have been held back.
        self.engine.shared.wakeup.notify_one();
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
