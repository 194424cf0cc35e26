use meridian_core::{PushCallback, PushError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Duration;
use tracing::debug;

type Slot = Arc<Mutex<Option<Box<dyn PushCallback>>>>;

/// Wrap `callback` so it completes exactly once: on the transport's reply or,
/// if none arrives within `callback.timeout()`, with `PushError::Timeout`.
///
/// The deadline timer runs on `runtime`, so this may be called from threads
/// outside of it, e.g. from a synchronous `ack` that completes the last batch.
pub(crate) fn with_deadline(
    runtime: &Handle,
    callback: Box<dyn PushCallback>,
) -> Box<dyn PushCallback> {
    let timeout = callback.timeout();
    let slot: Slot = Arc::new(Mutex::new(Some(callback)));

    let timer_slot = Arc::clone(&slot);
    let timer = runtime.spawn(async move {
        tokio::time::sleep(timeout).await;
        let expired = timer_slot.lock().take();
        if let Some(callback) = expired {
            debug!(?timeout, "push callback deadline elapsed without reply");
            callback.on_fail(PushError::Timeout(timeout));
        }
    });

    Box::new(DeadlineCallback {
        slot,
        timeout,
        timer: timer.abort_handle(),
    })
}

struct DeadlineCallback {
    slot: Slot,
    timeout: Duration,
    timer: AbortHandle,
}

impl DeadlineCallback {
    fn claim(&self) -> Option<Box<dyn PushCallback>> {
        self.timer.abort();
        self.slot.lock().take()
    }
}

impl PushCallback for DeadlineCallback {
    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn on_success(self: Box<Self>) {
        if let Some(callback) = self.claim() {
            callback.on_success();
        }
    }

    fn on_fail(self: Box<Self>, error: PushError) {
        if let Some(callback) = self.claim() {
            callback.on_fail(error);
        }
    }
}
