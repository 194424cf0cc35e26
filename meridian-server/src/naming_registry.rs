use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use meridian_core::{ChangeType, ServiceKey};
use meridian_push::FuzzyWatchRegistry;
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::server_metrics::{NAMING_CHANGES_TOTAL, NAMING_SERVICES};

/// Receives service level changes derived from instance mutations.
pub trait ServiceChangeListener: Send + Sync + 'static {
    fn on_service_changed(&self, service_key: &ServiceKey, change_type: ChangeType);
}

impl ServiceChangeListener for FuzzyWatchRegistry {
    fn on_service_changed(&self, service_key: &ServiceKey, change_type: ChangeType) {
        FuzzyWatchRegistry::on_service_changed(self, service_key, change_type);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// `ip:port` of the instance, unique within its service
    pub address: String,
    pub healthy: bool,
}

impl Instance {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            healthy: true,
        }
    }
}

/// In-memory service and instance store.
///
/// The first instance of a service emits `ADDED`, any later instance change
/// emits `MODIFIED`, and removing the last instance emits `DELETED`. Changes
/// are emitted while the service entry is locked, so the listener sees the
/// changes of one service in the order they were applied.
pub struct NamingRegistry {
    services: DashMap<ServiceKey, HashMap<String, Instance>>,
    listener: Arc<dyn ServiceChangeListener>,
}

impl NamingRegistry {
    pub fn new(listener: Arc<dyn ServiceChangeListener>) -> Self {
        Self {
            services: DashMap::new(),
            listener,
        }
    }

    /// Register or update an instance. Returns the emitted change, if any.
    pub fn register_instance(
        &self,
        service_key: &ServiceKey,
        instance: Instance,
    ) -> Option<ChangeType> {
        let mut instances = self.services.entry(service_key.clone()).or_default();
        let first = instances.is_empty();
        let previous = instances.insert(instance.address.clone(), instance.clone());

        let change = if first {
            ChangeType::Added
        } else if previous.as_ref() == Some(&instance) {
            trace!(service_key = %service_key, address = %instance.address, "instance unchanged");
            return None;
        } else {
            ChangeType::Modified
        };
        self.emit(service_key, change);
        drop(instances);

        if first {
            gauge!(NAMING_SERVICES.name).increment(1.0);
        }
        Some(change)
    }

    /// Remove an instance. Returns the emitted change, or `None` if the
    /// instance was unknown.
    pub fn deregister_instance(
        &self,
        service_key: &ServiceKey,
        address: &str,
    ) -> Option<ChangeType> {
        let Entry::Occupied(mut instances) = self.services.entry(service_key.clone()) else {
            return None;
        };
        instances.get_mut().remove(address)?;

        if instances.get().is_empty() {
            self.emit(service_key, ChangeType::Deleted);
            instances.remove();
            gauge!(NAMING_SERVICES.name).decrement(1.0);
            Some(ChangeType::Deleted)
        } else {
            self.emit(service_key, ChangeType::Modified);
            Some(ChangeType::Modified)
        }
    }

    fn emit(&self, service_key: &ServiceKey, change_type: ChangeType) {
        debug!(service_key = %service_key, change_type = %change_type, "service changed");
        counter!(NAMING_CHANGES_TOTAL.name, "change_type" => change_type.to_string()).increment(1);
        self.listener.on_service_changed(service_key, change_type);
    }

    pub fn instances(&self, service_key: &ServiceKey) -> Vec<Instance> {
        let mut instances: Vec<Instance> = self
            .services
            .get(service_key)
            .map(|instances| instances.values().cloned().collect())
            .unwrap_or_default();
        instances.sort_by(|a, b| a.address.cmp(&b.address));
        instances
    }

    pub fn service_keys(&self) -> Vec<ServiceKey> {
        self.services.iter().map(|entry| entry.key().clone()).collect()
    }
}
