use meridian_core::{
    ChangeType, ClientId, FuzzyWatchSyncRequest, Pattern, PushCallback, PushError, PushRequest,
    ServiceKey, SyncContext, SyncType,
};
use metrics::counter;
use std::collections::btree_map::{BTreeMap, Entry};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::{next_seq, record_drop, CompletionToken, PushContext, PushTask};
use crate::batch_counter::BatchTaskCounter;
use crate::callback::with_deadline;
use crate::engine::TaskEngine;
use crate::push_metrics::{
    PUSH_FAILURES_TOTAL, PUSH_RETRIES_TOTAL, PUSH_SUCCESS_TOTAL, SYNC_BATCHES_SENT_TOTAL,
    SYNC_TASKS_COMPLETED_TOTAL,
};

/// Pushes a set of service contexts for one pattern to one client, split into
/// ordered batches of at most `sync_batch_size` contexts.
///
/// Deduplicated per (client, pattern). Merging unions the contexts, keeps the
/// earliest process time so a steady stream of merges cannot starve the task,
/// and lets an init sync absorb a diff sync. For a key present in both, the
/// context of the more recent event wins: a retried batch keeps the sequence
/// it was created with and never overwrites a newer pending context.
#[derive(Debug, Clone)]
pub struct SyncNotifyTask {
    client_id: ClientId,
    pattern: Pattern,
    sync_type: SyncType,
    contexts: BTreeMap<ServiceKey, Stamped>,
    last_process_time: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Stamped {
    change_type: ChangeType,
    seq: u64,
}

type StampedContext = (ServiceKey, Stamped);

fn to_context((service_key, stamped): &StampedContext) -> SyncContext {
    SyncContext {
        service_key: service_key.clone(),
        change_type: stamped.change_type,
    }
}

impl SyncNotifyTask {
    pub fn new(
        client_id: ClientId,
        pattern: Pattern,
        sync_type: SyncType,
        contexts: impl IntoIterator<Item = SyncContext>,
        delay: Duration,
    ) -> Self {
        let seq = next_seq();
        Self::stamped(
            client_id,
            pattern,
            sync_type,
            contexts.into_iter().map(|ctx| {
                let stamped = Stamped {
                    change_type: ctx.change_type,
                    seq,
                };
                (ctx.service_key, stamped)
            }),
            delay,
        )
    }

    /// Contexts that keep their original event sequence, e.g. a failed batch.
    fn stamped(
        client_id: ClientId,
        pattern: Pattern,
        sync_type: SyncType,
        contexts: impl IntoIterator<Item = StampedContext>,
        delay: Duration,
    ) -> Self {
        Self {
            client_id,
            pattern,
            sync_type,
            contexts: contexts.into_iter().collect(),
            last_process_time: Instant::now() + delay,
        }
    }

    /// Full initial sync: every key is pushed as `ADDED`.
    pub fn init(
        client_id: ClientId,
        pattern: Pattern,
        keys: impl IntoIterator<Item = ServiceKey>,
        delay: Duration,
    ) -> Self {
        Self::new(
            client_id,
            pattern,
            SyncType::InitNotify,
            keys.into_iter().map(SyncContext::added),
            delay,
        )
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn sync_type(&self) -> SyncType {
        self.sync_type
    }

    pub fn ready_at(&self) -> Instant {
        self.last_process_time
    }

    /// Contexts in delivery order.
    pub fn contexts(&self) -> Vec<SyncContext> {
        self.contexts
            .iter()
            .map(|(service_key, stamped)| SyncContext {
                service_key: service_key.clone(),
                change_type: stamped.change_type,
            })
            .collect()
    }

    pub fn total_batch(&self, batch_size: usize) -> usize {
        self.contexts.len().div_ceil(batch_size.max(1))
    }

    pub(crate) fn merge(&mut self, newer: Self) {
        trace!(
            client_id = %self.client_id,
            pattern = %self.pattern,
            pending = self.contexts.len(),
            merged = newer.contexts.len(),
            "merging sync notify"
        );
        for (service_key, stamped) in newer.contexts {
            match self.contexts.entry(service_key) {
                Entry::Vacant(slot) => {
                    slot.insert(stamped);
                }
                Entry::Occupied(mut slot) => {
                    if stamped.seq >= slot.get().seq {
                        slot.insert(stamped);
                    }
                }
            }
        }
        self.last_process_time = self.last_process_time.min(newer.last_process_time);
        if newer.sync_type == SyncType::InitNotify {
            self.sync_type = SyncType::InitNotify;
        }
    }

    pub(crate) fn run(
        self,
        ctx: &Arc<PushContext>,
        engine: &TaskEngine<PushTask>,
        token: CompletionToken,
    ) {
        if self.contexts.is_empty() {
            if self.sync_type == SyncType::InitNotify {
                send_finish_init(ctx, engine, self.client_id, self.pattern, token);
            } else {
                trace!(client_id = %self.client_id, pattern = %self.pattern, "empty diff sync, nothing to push");
            }
            return;
        }

        let batch_size = ctx.config.sync_batch_size.max(1);
        let contexts: Vec<StampedContext> = self.contexts.into_iter().collect();
        let total_batch = contexts.len().div_ceil(batch_size);
        let counter = Arc::new(BatchTaskCounter::new(total_batch));
        debug!(
            client_id = %self.client_id,
            pattern = %self.pattern,
            sync_type = %self.sync_type,
            contexts = contexts.len(),
            total_batch,
            "pushing fuzzy watch sync"
        );

        for (current_batch, batch) in contexts.chunks(batch_size).enumerate() {
            let request = PushRequest::Sync(FuzzyWatchSyncRequest {
                pattern: self.pattern.clone(),
                sync_type: self.sync_type,
                contexts: batch.iter().map(to_context).collect(),
                current_batch,
                total_batch,
            });
            let callback = SyncBatchCallback {
                client_id: self.client_id.clone(),
                pattern: self.pattern.clone(),
                sync_type: self.sync_type,
                batch: batch.to_vec(),
                current_batch,
                counter: Arc::clone(&counter),
                ctx: Arc::clone(ctx),
                engine: engine.clone(),
                token: token.clone(),
            };
            ctx.executor.push_with_callback(
                &self.client_id,
                request,
                with_deadline(&ctx.runtime, Box::new(callback)),
            );
            counter!(SYNC_BATCHES_SENT_TOTAL.name).increment(1);
        }
    }
}

fn send_finish_init(
    ctx: &Arc<PushContext>,
    engine: &TaskEngine<PushTask>,
    client_id: ClientId,
    pattern: Pattern,
    token: CompletionToken,
) {
    let request = PushRequest::Sync(FuzzyWatchSyncRequest::finish_init(pattern.clone()));
    let callback = FinishInitCallback {
        client_id: client_id.clone(),
        pattern,
        ctx: Arc::clone(ctx),
        engine: engine.clone(),
        _token: token,
    };
    let callback = with_deadline(&ctx.runtime, Box::new(callback));
    ctx.executor.push_with_callback(&client_id, request, callback);
}

/// Re-enqueue `task` after the retry delay, unless the failure is terminal or
/// the binding is gone.
fn retry_sync(
    ctx: &PushContext,
    engine: &TaskEngine<PushTask>,
    task: SyncNotifyTask,
    error: &PushError,
    kind: &'static str,
) {
    let retryable = error.is_retryable();
    counter!(PUSH_FAILURES_TOTAL.name, "kind" => kind, "retryable" => retryable.to_string())
        .increment(1);

    if !retryable {
        warn!(
            client_id = %task.client_id,
            pattern = %task.pattern,
            error = %error,
            "{kind} failed permanently, dropping"
        );
        record_drop("terminal");
        return;
    }
    if !ctx.bindings.is_watching(&task.client_id, &task.pattern) {
        debug!(client_id = %task.client_id, pattern = %task.pattern, "binding gone, not retrying {kind}");
        record_drop("unbound");
        return;
    }

    let client_id = task.client_id.clone();
    let delay = ctx.config.push_task_retry_delay();
    match engine.add_task(task.into()) {
        Ok(()) => {
            counter!(PUSH_RETRIES_TOTAL.name, "kind" => kind).increment(1);
            debug!(client_id = %client_id, error = %error, ?delay, "{kind} failed, retry scheduled");
        }
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "{kind} retry rejected");
            record_drop("stopped");
        }
    }
}

struct SyncBatchCallback {
    client_id: ClientId,
    pattern: Pattern,
    sync_type: SyncType,
    batch: Vec<StampedContext>,
    current_batch: usize,
    counter: Arc<BatchTaskCounter>,
    ctx: Arc<PushContext>,
    engine: TaskEngine<PushTask>,
    token: CompletionToken,
}

impl PushCallback for SyncBatchCallback {
    fn timeout(&self) -> Duration {
        self.ctx.config.push_task_timeout()
    }

    fn on_success(self: Box<Self>) {
        counter!(PUSH_SUCCESS_TOTAL.name, "kind" => "sync_batch").increment(1);
        for (service_key, stamped) in &self.batch {
            self.ctx.bindings.record_synced(
                &self.client_id,
                &self.pattern,
                service_key,
                stamped.change_type,
            );
        }

        match self.counter.mark_batch_done(self.current_batch) {
            Ok(true) => {
                counter!(SYNC_TASKS_COMPLETED_TOTAL.name).increment(1);
                info!(
                    client_id = %self.client_id,
                    pattern = %self.pattern,
                    sync_type = %self.sync_type,
                    total_batch = self.counter.total_batch(),
                    "fuzzy watch sync fully delivered"
                );
                if self.sync_type == SyncType::InitNotify {
                    let this = *self;
                    send_finish_init(
                        &this.ctx,
                        &this.engine,
                        this.client_id,
                        this.pattern,
                        this.token,
                    );
                }
            }
            Ok(false) => {
                trace!(
                    client_id = %self.client_id,
                    current_batch = self.current_batch,
                    remaining = self.counter.remaining(),
                    "sync batch acknowledged"
                );
            }
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e, "sync batch acknowledgement rejected");
            }
        }
    }

    fn on_fail(self: Box<Self>, error: PushError) {
        let this = *self;
        // Only this batch's contexts go back into the engine.
        let retry = SyncNotifyTask::stamped(
            this.client_id,
            this.pattern,
            this.sync_type,
            this.batch,
            this.ctx.config.push_task_retry_delay(),
        );
        retry_sync(&this.ctx, &this.engine, retry, &error, "sync_batch");
    }
}

struct FinishInitCallback {
    client_id: ClientId,
    pattern: Pattern,
    ctx: Arc<PushContext>,
    engine: TaskEngine<PushTask>,
    _token: CompletionToken,
}

impl PushCallback for FinishInitCallback {
    fn timeout(&self) -> Duration {
        self.ctx.config.push_task_timeout()
    }

    fn on_success(self: Box<Self>) {
        counter!(PUSH_SUCCESS_TOTAL.name, "kind" => "finish_init").increment(1);
        debug!(client_id = %self.client_id, pattern = %self.pattern, "fuzzy watch init finished");
    }

    fn on_fail(self: Box<Self>, error: PushError) {
        let this = *self;
        // An empty init sync sends nothing but the finish marker.
        let retry = SyncNotifyTask::new(
            this.client_id,
            this.pattern,
            SyncType::InitNotify,
            Vec::new(),
            this.ctx.config.push_task_retry_delay(),
        );
        retry_sync(&this.ctx, &this.engine, retry, &error, "finish_init");
    }
}
