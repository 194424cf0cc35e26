#![allow(dead_code)]

use meridian_core::{ClientId, Pattern, PushCallback, PushError, PushExecutor, PushRequest, ServiceKey};
use meridian_push::{FuzzyWatchRegistry, PushConfig};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// How the fake transport answers one push.
#[derive(Debug, Clone)]
pub enum Reply {
    Ack,
    Fail(PushError),
    /// Keep the callback for the test to complete by hand.
    Hold,
}

/// One push as seen by the fake transport.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub client_id: ClientId,
    pub request: PushRequest,
    pub at: Instant,
}

/// Recording push executor with scripted per-client replies.
///
/// Unscripted pushes are acknowledged. With a latency set, replies are sent
/// from a spawned task after that delay.
#[derive(Default)]
pub struct FakeExecutor {
    latency: Duration,
    sent: Mutex<Vec<Delivery>>,
    scripts: Mutex<HashMap<ClientId, VecDeque<Reply>>>,
    held: Mutex<Vec<(Delivery, Box<dyn PushCallback>)>>,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Default::default()
        })
    }

    /// Queue replies for the next pushes to `client_id`.
    pub fn script(&self, client_id: &ClientId, replies: impl IntoIterator<Item = Reply>) {
        self.scripts
            .lock()
            .entry(client_id.clone())
            .or_default()
            .extend(replies);
    }

    pub fn sent(&self) -> Vec<Delivery> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, client_id: &ClientId) -> Vec<Delivery> {
        self.sent
            .lock()
            .iter()
            .filter(|d| &d.client_id == client_id)
            .cloned()
            .collect()
    }

    pub fn take_sent(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Held callbacks in push order.
    pub fn take_held(&self) -> Vec<(Delivery, Box<dyn PushCallback>)> {
        std::mem::take(&mut *self.held.lock())
    }
}

impl PushExecutor for FakeExecutor {
    fn push_with_callback(
        &self,
        client_id: &ClientId,
        request: PushRequest,
        callback: Box<dyn PushCallback>,
    ) {
        let delivery = Delivery {
            client_id: client_id.clone(),
            request,
            at: Instant::now(),
        };
        self.sent.lock().push(delivery.clone());

        let reply = self
            .scripts
            .lock()
            .get_mut(client_id)
            .and_then(|replies| replies.pop_front())
            .unwrap_or(Reply::Ack);

        match reply {
            Reply::Hold => self.held.lock().push((delivery, callback)),
            reply if self.latency.is_zero() => complete(callback, reply),
            reply => {
                let latency = self.latency;
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    complete(callback, reply);
                });
            }
        }
    }
}

fn complete(callback: Box<dyn PushCallback>, reply: Reply) {
    match reply {
        Reply::Fail(error) => callback.on_fail(error),
        Reply::Ack | Reply::Hold => callback.on_success(),
    }
}

pub fn test_config() -> PushConfig {
    PushConfig {
        push_task_timeout_ms: 1_000,
        push_task_retry_delay_ms: 100,
        sync_batch_size: 2,
        process_interval_ms: 10,
        ..Default::default()
    }
}

/// A started registry pushing through `executor`.
pub fn start_registry(config: PushConfig, executor: Arc<FakeExecutor>) -> FuzzyWatchRegistry {
    let registry = FuzzyWatchRegistry::new(config, executor).expect("valid push config");
    registry.start();
    registry
}

pub fn pattern(expression: &str) -> Pattern {
    Pattern::new("public", expression).expect("valid pattern")
}

pub fn service(group: &str, name: &str) -> ServiceKey {
    ServiceKey::new("public", group, name)
}
