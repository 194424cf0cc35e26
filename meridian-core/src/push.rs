use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::PushError;
use crate::naming::{ChangeType, ClientId, ServiceKey, SyncType};
use crate::pattern::Pattern;

/// Marker carried by change notifications: the client should treat the
/// service as changed and re-pull it if it cares about details.
pub const FUZZY_WATCH_RESOURCE_CHANGED: &str = "FUZZY_WATCH_RESOURCE_CHANGED";

/// Pushed to a client when one service matching a watched pattern changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzyWatchChangeNotifyRequest {
    pub pattern: Pattern,
    pub change_type: ChangeType,
    pub service_key: ServiceKey,
    pub sync_marker: String,
}

impl FuzzyWatchChangeNotifyRequest {
    pub fn new(pattern: Pattern, change_type: ChangeType, service_key: ServiceKey) -> Self {
        Self {
            pattern,
            change_type,
            service_key,
            sync_marker: FUZZY_WATCH_RESOURCE_CHANGED.to_string(),
        }
    }
}

/// One service entry inside a sync batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncContext {
    pub service_key: ServiceKey,
    pub change_type: ChangeType,
}

impl SyncContext {
    pub fn added(service_key: ServiceKey) -> Self {
        Self {
            service_key,
            change_type: ChangeType::Added,
        }
    }

    pub fn deleted(service_key: ServiceKey) -> Self {
        Self {
            service_key,
            change_type: ChangeType::Deleted,
        }
    }
}

/// One batch of a (possibly multi-batch) pattern sync.
///
/// `current_batch` is 0-based and strictly below `total_batch`, except for
/// the finish marker where both are 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzyWatchSyncRequest {
    pub pattern: Pattern,
    pub sync_type: SyncType,
    pub contexts: Vec<SyncContext>,
    pub current_batch: usize,
    pub total_batch: usize,
}

impl FuzzyWatchSyncRequest {
    pub fn finish_init(pattern: Pattern) -> Self {
        Self {
            pattern,
            sync_type: SyncType::FinishInitNotify,
            contexts: Vec::new(),
            current_batch: 0,
            total_batch: 0,
        }
    }
}

/// Everything the push engine may ask the transport to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PushRequest {
    ChangeNotify(FuzzyWatchChangeNotifyRequest),
    Sync(FuzzyWatchSyncRequest),
}

impl PushRequest {
    pub fn pattern(&self) -> &Pattern {
        match self {
            PushRequest::ChangeNotify(req) => &req.pattern,
            PushRequest::Sync(req) => &req.pattern,
        }
    }
}

/// Completion hook for one delivery attempt.
///
/// Both completion methods consume the callback, so a callback can complete
/// at most once.
pub trait PushCallback: Send + 'static {
    /// How long the transport may take before the attempt counts as failed.
    fn timeout(&self) -> Duration;

    fn on_success(self: Box<Self>);

    fn on_fail(self: Box<Self>, error: PushError);
}

/// Delivery boundary owned by the transport layer.
///
/// Implementations must not block the caller: delivery happens in the
/// background and the outcome is reported through exactly one of
/// `on_success` / `on_fail`.
pub trait PushExecutor: Send + Sync + 'static {
    fn push_with_callback(
        &self,
        client_id: &ClientId,
        request: PushRequest,
        callback: Box<dyn PushCallback>,
    );
}
