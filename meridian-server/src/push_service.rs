use anyhow::{Context, Result};
use meridian_core::{ChangeType, ClientId, Pattern, ServiceKey};
use meridian_push::{FuzzyWatchRegistry, WatchOutcome};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ClientSession, ConnectionManager};
use crate::naming_registry::{Instance, NamingRegistry};
use crate::service_configuration::ServiceConfiguration;

/// Wires the naming registry, the client sessions and the fuzzy watch push
/// engine together, and runs the periodic resync.
pub struct PushService {
    naming: Arc<NamingRegistry>,
    connections: Arc<ConnectionManager>,
    watch: Arc<FuzzyWatchRegistry>,
    resync_interval: Duration,
    ack_expiry: Duration,
    shutdown: CancellationToken,
    resync_task: Mutex<Option<JoinHandle<()>>>,
}

impl PushService {
    pub fn new(config: &ServiceConfiguration) -> Result<Self> {
        let connections = Arc::new(ConnectionManager::new(config.client_channel_capacity));
        let watch = Arc::new(
            FuzzyWatchRegistry::new(config.push.clone(), connections.clone())
                .context("failed to create fuzzy watch registry")?,
        );
        let naming = Arc::new(NamingRegistry::new(watch.clone()));

        Ok(Self {
            naming,
            connections,
            watch,
            resync_interval: config.push.resync_interval(),
            // Replies later than twice the push timeout can no longer complete anything.
            ack_expiry: config.push.push_task_timeout() * 2,
            shutdown: CancellationToken::new(),
            resync_task: Mutex::new(None),
        })
    }

    /// Start push delivery and the resync loop. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let seeded = self.watch.sync_services(self.naming.service_keys());
        self.watch.start();

        let mut resync_task = self.resync_task.lock();
        if resync_task.is_none() && !self.resync_interval.is_zero() {
            *resync_task = Some(tokio::spawn(run_resync_loop(
                Arc::clone(&self.watch),
                Arc::clone(&self.connections),
                self.resync_interval,
                self.ack_expiry,
                self.shutdown.clone(),
            )));
        }
        info!(seeded, resync_interval = ?self.resync_interval, "push service started");
    }

    pub fn register_instance(&self, service_key: &ServiceKey, instance: Instance) -> Option<ChangeType> {
        self.naming.register_instance(service_key, instance)
    }

    pub fn deregister_instance(&self, service_key: &ServiceKey, address: &str) -> Option<ChangeType> {
        self.naming.deregister_instance(service_key, address)
    }

    pub fn naming(&self) -> &NamingRegistry {
        &self.naming
    }

    pub fn watch_registry(&self) -> &FuzzyWatchRegistry {
        &self.watch
    }

    pub fn connect_client(&self, client_id: ClientId) -> ClientSession {
        self.connections.connect(client_id)
    }

    /// Close the client's session and release its watches. Returns the number
    /// of watch bindings released.
    pub fn disconnect_client(&self, client_id: &ClientId) -> usize {
        self.connections.disconnect(client_id);
        self.watch.on_client_disconnect(client_id)
    }

    pub fn connected_clients(&self) -> usize {
        self.connections.client_count()
    }

    /// Register a watch given in its textual `namespace>>expression` form.
    pub fn watch(&self, client_id: &ClientId, pattern: &str) -> meridian_push::Result<WatchOutcome> {
        let pattern: Pattern = pattern.parse()?;
        self.watch.watch(client_id, pattern)
    }

    pub fn watch_with_known(
        &self,
        client_id: &ClientId,
        pattern: &str,
        known: Vec<ServiceKey>,
    ) -> meridian_push::Result<WatchOutcome> {
        let pattern: Pattern = pattern.parse()?;
        self.watch.watch_with_known(client_id, pattern, known)
    }

    pub fn unwatch(&self, client_id: &ClientId, pattern: &Pattern) -> bool {
        self.watch.unwatch(client_id, pattern)
    }

    /// Deliver a client's reply to a push. Safe to call off the runtime.
    pub fn ack(&self, client_id: &ClientId, request_id: u64, result: std::result::Result<(), String>) -> bool {
        self.connections.ack(client_id, request_id, result)
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let resync_task = self.resync_task.lock().take();
        if let Some(handle) = resync_task {
            if let Err(e) = handle.await {
                warn!(error = %e, "resync loop exited abnormally");
            }
        }
        let dropped = self.watch.shutdown().await;
        info!(dropped, "push service stopped");
    }
}

async fn run_resync_loop(
    watch: Arc<FuzzyWatchRegistry>,
    connections: Arc<ConnectionManager>,
    period: Duration,
    ack_expiry: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let resynced = watch.resync();
                let expired = connections.expire_pending(ack_expiry);
                if resynced > 0 || expired > 0 {
                    debug!(resynced, expired, "fuzzy watch resync round");
                }
            }
        }
    }
    debug!("resync loop exited");
}
