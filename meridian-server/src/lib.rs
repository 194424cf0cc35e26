//! Meridian push server: the naming registry, in-process client sessions and
//! the fuzzy watch push engine wired together.

pub mod connection;
pub mod naming_registry;
pub mod push_service;
pub mod server_metrics;
pub mod service_configuration;

pub use connection::{ClientSession, ConnectionManager, ServerPush};
pub use naming_registry::{Instance, NamingRegistry, ServiceChangeListener};
pub use push_service::PushService;
pub use service_configuration::{LoadConfiguration, ServiceConfiguration};
