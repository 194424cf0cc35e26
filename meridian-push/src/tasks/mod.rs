//! Push task variants executed by the delay task engine.
//!
//! Every task is bound to one (client, pattern) watch binding. The processor
//! drops a task whose binding disappeared before dispatch, and a task stays
//! in flight until every callback it handed to the executor completed, so a
//! second delivery for the same key never overtakes an unacknowledged one.

mod change_notify;
mod sync_notify;

pub use change_notify::ChangeNotifyTask;
pub use sync_notify::SyncNotifyTask;

use async_trait::async_trait;
use meridian_core::{ClientId, Pattern, PushExecutor};
use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::bindings::WatchBindings;
use crate::config::PushConfig;
use crate::engine::{DelayTask, Outstanding, TaskEngine, TaskProcessor};
use crate::push_metrics::PUSH_TASKS_DROPPED_TOTAL;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PushTaskKey {
    ChangeNotify { pattern: Pattern, client_id: ClientId },
    SyncNotify { client_id: ClientId, pattern: Pattern },
}

impl PushTaskKey {
    pub fn client_id(&self) -> &ClientId {
        match self {
            PushTaskKey::ChangeNotify { client_id, .. } => client_id,
            PushTaskKey::SyncNotify { client_id, .. } => client_id,
        }
    }

    pub fn pattern(&self) -> &Pattern {
        match self {
            PushTaskKey::ChangeNotify { pattern, .. } => pattern,
            PushTaskKey::SyncNotify { pattern, .. } => pattern,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PushTask {
    ChangeNotify(ChangeNotifyTask),
    SyncNotify(SyncNotifyTask),
}

impl PushTask {
    pub fn client_id(&self) -> &ClientId {
        match self {
            PushTask::ChangeNotify(task) => task.client_id(),
            PushTask::SyncNotify(task) => task.client_id(),
        }
    }

    pub fn pattern(&self) -> &Pattern {
        match self {
            PushTask::ChangeNotify(task) => task.pattern(),
            PushTask::SyncNotify(task) => task.pattern(),
        }
    }
}

impl From<ChangeNotifyTask> for PushTask {
    fn from(task: ChangeNotifyTask) -> Self {
        PushTask::ChangeNotify(task)
    }
}

impl From<SyncNotifyTask> for PushTask {
    fn from(task: SyncNotifyTask) -> Self {
        PushTask::SyncNotify(task)
    }
}

impl DelayTask for PushTask {
    type Key = PushTaskKey;

    fn key(&self) -> PushTaskKey {
        match self {
            PushTask::ChangeNotify(task) => PushTaskKey::ChangeNotify {
                pattern: task.pattern().clone(),
                client_id: task.client_id().clone(),
            },
            PushTask::SyncNotify(task) => PushTaskKey::SyncNotify {
                client_id: task.client_id().clone(),
                pattern: task.pattern().clone(),
            },
        }
    }

    fn ready_at(&self) -> Instant {
        match self {
            PushTask::ChangeNotify(task) => task.ready_at(),
            PushTask::SyncNotify(task) => task.ready_at(),
        }
    }

    fn merge(&mut self, newer: Self) {
        match (self, newer) {
            (PushTask::ChangeNotify(pending), PushTask::ChangeNotify(newer)) => pending.merge(newer),
            (PushTask::SyncNotify(pending), PushTask::SyncNotify(newer)) => pending.merge(newer),
            (pending, newer) => {
                warn!(pending = ?pending.key(), newer = ?newer.key(), "ignoring merge of mismatched push task kinds");
            }
        }
    }
}

/// Collaborators shared by every push task execution and callback.
pub(crate) struct PushContext {
    pub(crate) executor: Arc<dyn PushExecutor>,
    pub(crate) bindings: Arc<WatchBindings>,
    pub(crate) config: PushConfig,
    /// Runtime that drives callback deadlines, so replies may arrive from any thread.
    pub(crate) runtime: Handle,
}

/// Held by every callback of one execution; the execution finishes once all
/// clones are dropped.
#[derive(Clone)]
pub(crate) struct CompletionToken {
    _tx: mpsc::Sender<()>,
}

pub(crate) fn completion() -> (CompletionToken, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (CompletionToken { _tx: tx }, rx)
}

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Process-wide order of change events. A retry keeps the sequence of the
/// event it carries, so merges can tell it apart from newer submissions.
pub(crate) fn next_seq() -> u64 {
    NEXT_SEQ.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn record_drop(reason: &'static str) {
    counter!(PUSH_TASKS_DROPPED_TOTAL.name, "reason" => reason).increment(1);
}

/// Checks the watch binding, then runs the task and waits for its callbacks.
pub(crate) struct PushTaskProcessor {
    ctx: Arc<PushContext>,
}

impl PushTaskProcessor {
    pub(crate) fn new(ctx: Arc<PushContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskProcessor<PushTask> for PushTaskProcessor {
    async fn process(&self, task: PushTask, engine: TaskEngine<PushTask>) -> Option<Outstanding> {
        if !self.ctx.bindings.is_watching(task.client_id(), task.pattern()) {
            debug!(
                client_id = %task.client_id(),
                pattern = %task.pattern(),
                "dropping push task, binding no longer exists"
            );
            record_drop("unbound");
            return None;
        }

        let (token, mut done) = completion();
        match task {
            PushTask::ChangeNotify(task) => task.run(&self.ctx, &engine, token),
            PushTask::SyncNotify(task) => task.run(&self.ctx, &engine, token),
        }
        // Resolves once every callback (and its deadline guard) released its token.
        Some(Box::pin(async move {
            let _ = done.recv().await;
        }))
    }
}
