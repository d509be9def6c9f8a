//! Wire format of the custom resources

use chrono::{TimeZone, Utc};
use serde_json::json;
use sentry_operator::crd::{Project, ProjectSpec, Registry, SyncCondition, SyncStatus, Team};

#[test]
fn test_status_uses_camel_case_and_omits_empty_fields() {
    let status = SyncStatus {
        condition: Some(SyncCondition::Created),
        message: String::new(),
        id: "42".to_string(),
        last_synced: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()),
    };

    let value = serde_json::to_value(&status).unwrap();
    assert_eq!(
        value,
        json!({
            "condition": "Created",
            "id": "42",
            "lastSynced": "2024-03-01T09:30:00Z",
        })
    );
}

#[test]
fn test_unsynced_status_is_empty() {
    let value = serde_json::to_value(SyncStatus::default()).unwrap();
    assert_eq!(value, json!({}));
}

#[test]
fn test_project_deserializes_from_manifest() {
    let manifest = json!({
        "apiVersion": "sentry.kubernetes.jaceys.me/v1alpha1",
        "kind": "Project",
        "metadata": { "name": "checkout", "namespace": "shop" },
        "spec": { "name": "Checkout", "slug": "checkout", "team": "payments" },
        "status": { "condition": "Error", "message": "rate limited" }
    });

    let project: Project = serde_json::from_value(manifest).unwrap();
    assert_eq!(
        project.spec,
        ProjectSpec {
            name: "Checkout".to_string(),
            slug: "checkout".to_string(),
            team: "payments".to_string(),
        }
    );
    let status = project.status.unwrap();
    assert_eq!(status.condition, Some(SyncCondition::Error));
    assert_eq!(status.remote_id(), None);
}

#[test]
fn test_registry_lists_both_kinds() {
    let registry = Registry::with_sentry_kinds();
    let names: Vec<_> = registry.kinds().map(|k| k.kind).collect();
    assert_eq!(
        names,
        vec!["teams.sentry.kubernetes.jaceys.me", "projects.sentry.kubernetes.jaceys.me"]
    );

    // Registering a kind again changes nothing
    assert_eq!(registry.register::<Team>().kinds().count(), 2);
}
