//! In-process client sessions and the connection-backed push executor.
//!
//! Every connected client owns a bounded channel of [`ServerPush`] frames. A
//! push stays pending until the client acknowledges its request id, or until
//! the session goes away, which fails it as a terminal `ClientDisconnected`.

use dashmap::DashMap;
use meridian_core::{ClientId, PushCallback, PushError, PushExecutor, PushRequest};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::server_metrics::{CLIENT_ACKS_TOTAL, CONNECTED_CLIENTS};

/// Frame delivered to a client; it answers with `ack(request_id, ..)`.
#[derive(Debug, Clone)]
pub struct ServerPush {
    pub request_id: u64,
    pub request: PushRequest,
}

/// Client side of a session.
pub struct ClientSession {
    pub client_id: ClientId,
    pub pushes: mpsc::Receiver<ServerPush>,
}

struct PendingAck {
    callback: Box<dyn PushCallback>,
    sent_at: Instant,
}

struct Session {
    // Distinguishes a reconnected session from the one it replaced.
    session_id: u64,
    tx: mpsc::Sender<ServerPush>,
    pending: Mutex<HashMap<u64, PendingAck>>,
}

impl Session {
    fn fail_pending(&self, client_id: &ClientId) -> usize {
        let pending: Vec<PendingAck> = self.pending.lock().drain().map(|(_, ack)| ack).collect();
        let failed = pending.len();
        for ack in pending {
            ack.callback
                .on_fail(PushError::ClientDisconnected(client_id.to_string()));
        }
        failed
    }
}

pub struct ConnectionManager {
    sessions: DashMap<ClientId, Arc<Session>>,
    next_id: AtomicU64,
    channel_capacity: usize,
}

impl ConnectionManager {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Open a session for `client_id`, replacing (and failing the pending
    /// pushes of) any previous session with the same id.
    pub fn connect(&self, client_id: ClientId) -> ClientSession {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let session = Arc::new(Session {
            session_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            tx,
            pending: Mutex::new(HashMap::new()),
        });

        match self.sessions.insert(client_id.clone(), session) {
            Some(previous) => {
                let failed = previous.fail_pending(&client_id);
                info!(client_id = %client_id, failed, "client session replaced");
            }
            None => {
                gauge!(CONNECTED_CLIENTS.name).increment(1.0);
                info!(client_id = %client_id, "client connected");
            }
        }

        ClientSession {
            client_id,
            pushes: rx,
        }
    }

    /// Close the session of `client_id`. Returns false if it was not connected.
    pub fn disconnect(&self, client_id: &ClientId) -> bool {
        let Some((_, session)) = self.sessions.remove(client_id) else {
            return false;
        };
        gauge!(CONNECTED_CLIENTS.name).decrement(1.0);
        let failed = session.fail_pending(client_id);
        info!(client_id = %client_id, failed, "client disconnected");
        true
    }

    pub fn is_connected(&self, client_id: &ClientId) -> bool {
        self.sessions.contains_key(client_id)
    }

    pub fn client_count(&self) -> usize {
        self.sessions.len()
    }

    /// Complete the push `request_id` with the client's verdict.
    ///
    /// Returns false for unknown or already completed requests. May be called
    /// from any thread.
    pub fn ack(
        &self,
        client_id: &ClientId,
        request_id: u64,
        result: Result<(), String>,
    ) -> bool {
        let Some(session) = self.session(client_id) else {
            return false;
        };
        let Some(pending) = session.pending.lock().remove(&request_id) else {
            trace!(client_id = %client_id, request_id, "ack for unknown push");
            return false;
        };

        let outcome = if result.is_ok() { "ok" } else { "rejected" };
        counter!(CLIENT_ACKS_TOTAL.name, "outcome" => outcome).increment(1);
        match result {
            Ok(()) => pending.callback.on_success(),
            Err(reason) => pending.callback.on_fail(PushError::Rejected(reason)),
        }
        true
    }

    /// Forget pushes sent more than `max_age` ago. Their callbacks already
    /// timed out through the push engine's deadline.
    pub fn expire_pending(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        for session in self.sessions.iter() {
            session
                .pending
                .lock()
                .retain(|request_id, ack| {
                    let keep = now.duration_since(ack.sent_at) < max_age;
                    if !keep {
                        expired.push((session.key().clone(), *request_id));
                    }
                    keep
                });
        }
        for (client_id, request_id) in &expired {
            debug!(client_id = %client_id, request_id, "expired unacknowledged push");
        }
        expired.len()
    }

    pub fn pending_len(&self, client_id: &ClientId) -> usize {
        self.session(client_id)
            .map(|session| session.pending.lock().len())
            .unwrap_or(0)
    }

    fn session(&self, client_id: &ClientId) -> Option<Arc<Session>> {
        self.sessions
            .get(client_id)
            .map(|session| Arc::clone(session.value()))
    }
}

impl PushExecutor for ConnectionManager {
    fn push_with_callback(
        &self,
        client_id: &ClientId,
        request: PushRequest,
        callback: Box<dyn PushCallback>,
    ) {
        let Some(session) = self.session(client_id) else {
            callback.on_fail(PushError::ClientDisconnected(client_id.to_string()));
            return;
        };

        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        session.pending.lock().insert(
            request_id,
            PendingAck {
                callback,
                sent_at: Instant::now(),
            },
        );

        let error = match session.tx.try_send(ServerPush {
            request_id,
            request,
        }) {
            Ok(()) => {
                trace!(client_id = %client_id, request_id, session_id = session.session_id, "push sent");
                return;
            }
            Err(TrySendError::Full(_)) => PushError::Transport("client push channel full".into()),
            Err(TrySendError::Closed(_)) => PushError::ClientDisconnected(client_id.to_string()),
        };

        // The ack may still have raced in; only fail what is still pending.
        let pending = session.pending.lock().remove(&request_id);
        if let Some(pending) = pending {
            warn!(client_id = %client_id, request_id, error = %error, "push not delivered");
            pending.callback.on_fail(error);
        }
    }
}
