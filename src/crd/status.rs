//! Observed state shared by every Sentry-backed resource

use std::fmt;

use chrono::{DateTime, Utc};
use kube::{Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Coarse observed state; unset means the resource has not been synced yet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum SyncCondition {
    Created,
    Error,
}

impl fmt::Display for SyncCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncCondition::Created => f.write_str("Created"),
            SyncCondition::Error => f.write_str("Error"),
        }
    }
}

/// Status written back after every reconcile attempt
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<SyncCondition>,

    /// Last error, empty after a successful sync
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Sentry identifier, set once the remote object is confirmed
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
}

impl SyncStatus {
    /// The Sentry id, if one has been recorded
    pub fn remote_id(&self) -> Option<&str> {
        Some(self.id.as_str()).filter(|id| !id.is_empty())
    }
}

/// Access to the [`SyncStatus`] of a resource
pub trait Synced {
    fn sync_status(&self) -> Option<&SyncStatus>;

    fn sync_status_mut(&mut self) -> &mut Option<SyncStatus>;
}

/// Namespace and name identifying one object in the store
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_resource<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace().unwrap_or_else(|| "default".to_string()),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
