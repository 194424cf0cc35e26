use serde::{Deserialize, Serialize};
use std::fmt;

/// Concrete identity of one registered service: (namespace, group, service name).
///
/// The matchable path of a key is `group.name` split on `.`; service names may
/// themselves contain dots and contribute several segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub namespace: String,
    pub group: String,
    pub name: String,
}

impl ServiceKey {
    pub fn new(
        namespace: impl Into<String>,
        group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            group: group.into(),
            name: name.into(),
        }
    }

    /// Path segments used for wildcard matching, group segments first.
    pub fn path_segments(&self) -> Vec<&str> {
        self.group.split('.').chain(self.name.split('.')).collect()
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>>{}.{}", self.namespace, self.group, self.name)
    }
}

/// Opaque transport-assigned identifier of a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        ClientId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        ClientId(id.to_string())
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        ClientId(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of mutation the registry observed for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Added,
    Deleted,
    Modified,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Added => "ADDED",
            ChangeType::Deleted => "DELETED",
            ChangeType::Modified => "MODIFIED",
        };
        f.write_str(s)
    }
}

/// Flavour of a fuzzy watch sync push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncType {
    /// Full matching set pushed after a new watch registration.
    #[serde(rename = "FUZZY_WATCH_INIT_NOTIFY")]
    InitNotify,
    /// Marker sent once every init batch has been acknowledged.
    #[serde(rename = "FINISH_FUZZY_WATCH_INIT_NOTIFY")]
    FinishInitNotify,
    /// Reconciliation of what the client holds against what the server matches.
    #[serde(rename = "FUZZY_WATCH_DIFF_SYNC_NOTIFY")]
    DiffSyncNotify,
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncType::InitNotify => "FUZZY_WATCH_INIT_NOTIFY",
            SyncType::FinishInitNotify => "FINISH_FUZZY_WATCH_INIT_NOTIFY",
            SyncType::DiffSyncNotify => "FUZZY_WATCH_DIFF_SYNC_NOTIFY",
        };
        f.write_str(s)
    }
}
