mod batch_counter;
mod bindings;
mod callback;
mod config;
mod engine;
mod errors;
mod pattern_index;
pub mod push_metrics;
mod tasks;
mod watch_registry;

pub use batch_counter::BatchTaskCounter;
pub use bindings::WatchBindings;
pub use config::PushConfig;
pub use engine::{DelayTask, EngineOptions, Outstanding, TaskEngine, TaskProcessor};
pub use errors::{Result, WatchError};
pub use pattern_index::PatternIndex;
pub use tasks::{ChangeNotifyTask, PushTask, PushTaskKey, SyncNotifyTask};
pub use watch_registry::{FuzzyWatchRegistry, WatchOutcome};
