use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use meridian_core::{ChangeType, ClientId, Pattern, ServiceKey};
use metrics::gauge;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::errors::{Result, WatchError};
use crate::pattern_index::PatternIndex;
use crate::push_metrics::FUZZY_WATCH_BINDINGS;

/// Many-to-many (client, pattern) watch bindings plus the keys each client
/// has acknowledged for each of its patterns.
///
/// A pattern is registered in the [`PatternIndex`] while at least one client
/// watches it. Locks are always taken in the order client entry, pattern
/// entry, index.
#[derive(Debug)]
pub struct WatchBindings {
    index: Arc<PatternIndex>,
    by_client: DashMap<ClientId, HashMap<Pattern, HashSet<ServiceKey>>>,
    by_pattern: DashMap<Pattern, HashSet<ClientId>>,
}

impl WatchBindings {
    pub fn new(index: Arc<PatternIndex>) -> Self {
        Self {
            index,
            by_client: DashMap::new(),
            by_pattern: DashMap::new(),
        }
    }

    /// Bind `client_id` to `pattern`. Returns false if the binding already existed.
    ///
    /// Fails with [`WatchError::PatternOverLimit`] when the client already
    /// watches `limit` other patterns.
    pub fn bind(&self, client_id: &ClientId, pattern: &Pattern, limit: usize) -> Result<bool> {
        let mut watched = self.by_client.entry(client_id.clone()).or_default();
        if watched.contains_key(pattern) {
            return Ok(false);
        }
        if watched.len() >= limit {
            return Err(WatchError::PatternOverLimit {
                client_id: client_id.clone(),
                limit,
            });
        }
        watched.insert(pattern.clone(), HashSet::new());

        let mut watchers = self.by_pattern.entry(pattern.clone()).or_default();
        if watchers.is_empty() {
            self.index.add_pattern(pattern);
        }
        watchers.insert(client_id.clone());
        drop(watchers);
        drop(watched);

        gauge!(FUZZY_WATCH_BINDINGS.name).increment(1.0);
        Ok(true)
    }

    /// Remove one binding. Returns false if it did not exist.
    pub fn unbind(&self, client_id: &ClientId, pattern: &Pattern) -> bool {
        let Some(mut watched) = self.by_client.get_mut(client_id) else {
            return false;
        };
        if watched.remove(pattern).is_none() {
            return false;
        }
        self.release_watcher(client_id, pattern);
        let now_empty = watched.is_empty();
        drop(watched);

        if now_empty {
            self.by_client.remove_if(client_id, |_, watched| watched.is_empty());
        }
        gauge!(FUZZY_WATCH_BINDINGS.name).decrement(1.0);
        true
    }

    /// Remove every binding of a client, returning the patterns it watched.
    pub fn remove_client(&self, client_id: &ClientId) -> Vec<Pattern> {
        let Some((_, watched)) = self.by_client.remove(client_id) else {
            return Vec::new();
        };
        let patterns: Vec<Pattern> = watched.into_keys().collect();
        for pattern in &patterns {
            self.release_watcher(client_id, pattern);
        }
        gauge!(FUZZY_WATCH_BINDINGS.name).decrement(patterns.len() as f64);
        patterns
    }

    fn release_watcher(&self, client_id: &ClientId, pattern: &Pattern) {
        if let Entry::Occupied(mut watchers) = self.by_pattern.entry(pattern.clone()) {
            watchers.get_mut().remove(client_id);
            if watchers.get().is_empty() {
                watchers.remove();
                self.index.remove_pattern(pattern);
            }
        }
    }

    pub fn clients_of(&self, pattern: &Pattern) -> Vec<ClientId> {
        self.by_pattern
            .get(pattern)
            .map(|watchers| watchers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_watching(&self, client_id: &ClientId, pattern: &Pattern) -> bool {
        self.by_client
            .get(client_id)
            .is_some_and(|watched| watched.contains_key(pattern))
    }

    pub fn patterns_of(&self, client_id: &ClientId) -> Vec<Pattern> {
        self.by_client
            .get(client_id)
            .map(|watched| watched.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn pattern_count(&self, client_id: &ClientId) -> usize {
        self.by_client
            .get(client_id)
            .map(|watched| watched.len())
            .unwrap_or(0)
    }

    pub fn binding_count(&self) -> usize {
        self.by_client.iter().map(|entry| entry.value().len()).sum()
    }

    /// Snapshot of every (client, pattern) binding.
    pub fn all_bindings(&self) -> Vec<(ClientId, Pattern)> {
        self.by_client
            .iter()
            .flat_map(|entry| {
                let client_id = entry.key().clone();
                entry
                    .value()
                    .keys()
                    .map(|pattern| (client_id.clone(), pattern.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Apply an acknowledged change to the synced keys of one binding.
    ///
    /// Ignored when the binding no longer exists.
    pub fn record_synced(
        &self,
        client_id: &ClientId,
        pattern: &Pattern,
        service_key: &ServiceKey,
        change_type: ChangeType,
    ) {
        let Some(mut watched) = self.by_client.get_mut(client_id) else {
            return;
        };
        let Some(synced) = watched.get_mut(pattern) else {
            return;
        };
        match change_type {
            ChangeType::Deleted => {
                synced.remove(service_key);
            }
            ChangeType::Added | ChangeType::Modified => {
                synced.insert(service_key.clone());
            }
        }
    }

    /// Overwrite the synced keys of one binding, e.g. with what a reconnecting
    /// client reports it already holds.
    pub fn replace_synced(
        &self,
        client_id: &ClientId,
        pattern: &Pattern,
        keys: HashSet<ServiceKey>,
    ) -> bool {
        let Some(mut watched) = self.by_client.get_mut(client_id) else {
            return false;
        };
        match watched.get_mut(pattern) {
            Some(synced) => {
                *synced = keys;
                true
            }
            None => false,
        }
    }

    pub fn synced_keys(&self, client_id: &ClientId, pattern: &Pattern) -> Option<HashSet<ServiceKey>> {
        self.by_client
            .get(client_id)
            .and_then(|watched| watched.get(pattern).cloned())
    }
}
