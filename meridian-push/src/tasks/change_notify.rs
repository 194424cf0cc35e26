use meridian_core::{
    ChangeType, ClientId, FuzzyWatchChangeNotifyRequest, Pattern, PushCallback, PushError,
    PushRequest, ServiceKey,
};
use metrics::counter;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::{next_seq, record_drop, CompletionToken, PushContext, PushTask};
use crate::callback::with_deadline;
use crate::engine::TaskEngine;
use crate::push_metrics::{PUSH_FAILURES_TOTAL, PUSH_RETRIES_TOTAL, PUSH_SUCCESS_TOTAL};

/// Notifies one client that one service matching one of its patterns changed.
///
/// Deduplicated per (pattern, client): while pending, only the most recent
/// change survives. Recency is decided by the sequence number assigned when
/// the change event was created, so a re-enqueued retry never overwrites a
/// newer pending change.
#[derive(Debug, Clone)]
pub struct ChangeNotifyTask {
    pattern: Pattern,
    client_id: ClientId,
    service_key: ServiceKey,
    change_type: ChangeType,
    seq: u64,
    ready_at: Instant,
}

impl ChangeNotifyTask {
    pub fn new(
        pattern: Pattern,
        client_id: ClientId,
        service_key: ServiceKey,
        change_type: ChangeType,
        delay: Duration,
    ) -> Self {
        Self {
            pattern,
            client_id,
            service_key,
            change_type,
            seq: next_seq(),
            ready_at: Instant::now() + delay,
        }
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn service_key(&self) -> &ServiceKey {
        &self.service_key
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub fn ready_at(&self) -> Instant {
        self.ready_at
    }

    /// Same change, rescheduled `delay` from now.
    fn retry(mut self, delay: Duration) -> Self {
        self.ready_at = Instant::now() + delay;
        self
    }

    pub(crate) fn merge(&mut self, newer: Self) {
        let ready_at = self.ready_at.min(newer.ready_at);
        if newer.seq >= self.seq {
            trace!(
                client_id = %self.client_id,
                pattern = %self.pattern,
                replaced = %self.service_key,
                by = %newer.service_key,
                "change notify superseded by newer change"
            );
            self.service_key = newer.service_key;
            self.change_type = newer.change_type;
            self.seq = newer.seq;
        }
        self.ready_at = ready_at;
    }

    pub(crate) fn run(
        self,
        ctx: &Arc<PushContext>,
        engine: &TaskEngine<PushTask>,
        token: CompletionToken,
    ) {
        trace!(
            client_id = %self.client_id,
            pattern = %self.pattern,
            service_key = %self.service_key,
            change_type = %self.change_type,
            "pushing fuzzy watch change notify"
        );
        let request = PushRequest::ChangeNotify(FuzzyWatchChangeNotifyRequest::new(
            self.pattern.clone(),
            self.change_type,
            self.service_key.clone(),
        ));
        let client_id = self.client_id.clone();
        let callback = ChangeNotifyCallback {
            task: self,
            ctx: Arc::clone(ctx),
            engine: engine.clone(),
            _token: token,
        };
        let callback = with_deadline(&ctx.runtime, Box::new(callback));
        ctx.executor.push_with_callback(&client_id, request, callback);
    }
}

struct ChangeNotifyCallback {
    task: ChangeNotifyTask,
    ctx: Arc<PushContext>,
    engine: TaskEngine<PushTask>,
    _token: CompletionToken,
}

impl PushCallback for ChangeNotifyCallback {
    fn timeout(&self) -> Duration {
        self.ctx.config.push_task_timeout()
    }

    fn on_success(self: Box<Self>) {
        let task = &self.task;
        counter!(PUSH_SUCCESS_TOTAL.name, "kind" => "change_notify").increment(1);
        self.ctx.bindings.record_synced(
            &task.client_id,
            &task.pattern,
            &task.service_key,
            task.change_type,
        );
        trace!(
            client_id = %task.client_id,
            service_key = %task.service_key,
            "change notify acknowledged"
        );
    }

    fn on_fail(self: Box<Self>, error: PushError) {
        let retryable = error.is_retryable();
        counter!(PUSH_FAILURES_TOTAL.name, "kind" => "change_notify", "retryable" => retryable.to_string())
            .increment(1);

        let this = *self;
        if !retryable {
            warn!(
                client_id = %this.task.client_id,
                pattern = %this.task.pattern,
                service_key = %this.task.service_key,
                error = %error,
                "change notify failed permanently, dropping"
            );
            record_drop("terminal");
            return;
        }
        if !this
            .ctx
            .bindings
            .is_watching(&this.task.client_id, &this.task.pattern)
        {
            debug!(client_id = %this.task.client_id, pattern = %this.task.pattern, "binding gone, not retrying change notify");
            record_drop("unbound");
            return;
        }

        let delay = this.ctx.config.push_task_retry_delay();
        let client_id = this.task.client_id.clone();
        match this.engine.add_task(this.task.retry(delay).into()) {
            Ok(()) => {
                counter!(PUSH_RETRIES_TOTAL.name, "kind" => "change_notify").increment(1);
                debug!(client_id = %client_id, error = %error, ?delay, "change notify failed, retry scheduled");
            }
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "change notify retry rejected");
                record_drop("stopped");
            }
        }
    }
}
