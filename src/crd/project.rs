//! Project Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{SyncStatus, Synced};

/// Project resource specification
#[derive(CustomResource, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "sentry.kubernetes.jaceys.me",
    version = "v1alpha1",
    kind = "Project",
    plural = "projects",
    singular = "project",
    namespaced,
    status = "SyncStatus",
    printcolumn = r#"{"name": "Team", "type": "string", "jsonPath": ".spec.team"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.condition"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    /// Display name of the project in Sentry
    pub name: String,

    /// Unique project slug within the organization
    pub slug: String,

    /// Slug of the owning team
    pub team: String,
}

impl Synced for Project {
    fn sync_status(&self) -> Option<&SyncStatus> {
        self.status.as_ref()
    }

    fn sync_status_mut(&mut self) -> &mut Option<SyncStatus> {
        &mut self.status
    }
}
