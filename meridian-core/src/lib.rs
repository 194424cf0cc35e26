pub mod errors;
pub mod naming;
pub mod pattern;
pub mod push;

pub use errors::{PatternError, PushError, Result};
pub use naming::{ChangeType, ClientId, ServiceKey, SyncType};
pub use pattern::{Pattern, Segment};
pub use push::{
    FuzzyWatchChangeNotifyRequest, FuzzyWatchSyncRequest, PushCallback, PushExecutor,
    PushRequest, SyncContext, FUZZY_WATCH_RESOURCE_CHANGED,
};
