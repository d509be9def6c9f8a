//! Team Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{SyncStatus, Synced};

/// Team resource specification
#[derive(CustomResource, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "sentry.kubernetes.jaceys.me",
    version = "v1alpha1",
    kind = "Team",
    plural = "teams",
    singular = "team",
    namespaced,
    status = "SyncStatus",
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.condition"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TeamSpec {
    /// Display name of the team in Sentry
    pub name: String,

    /// Unique team slug within the organization
    pub slug: String,
}

impl Synced for Team {
    fn sync_status(&self) -> Option<&SyncStatus> {
        self.status.as_ref()
    }

    fn sync_status_mut(&mut self) -> &mut Option<SyncStatus> {
        &mut self.status
    }
}
