//! Status projection after a reconcile attempt
//!
//! Every code path (create, update, delete, drift) derives the new status
//! through [`project`] so the fields stay consistent.

use chrono::{DateTime, Utc};

use crate::crd::{SyncCondition, SyncStatus};

/// What a reconcile attempt observed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Sentry confirmed the object with this id
    Synced { id: String },
    /// The attempt failed; the id is kept
    Failed { message: String },
    /// The recorded id no longer exists in Sentry
    Drifted { message: String },
}

/// Compute the status to write back
pub fn project(prior: &SyncStatus, outcome: &SyncOutcome, now: DateTime<Utc>) -> SyncStatus {
    match outcome {
        SyncOutcome::Synced { id } => SyncStatus {
            condition: Some(SyncCondition::Created),
            message: String::new(),
            id: id.clone(),
            last_synced: Some(now),
        },
        SyncOutcome::Failed { message } => SyncStatus {
            condition: Some(SyncCondition::Error),
            message: non_empty(message),
            ..prior.clone()
        },
        SyncOutcome::Drifted { message } => SyncStatus {
            condition: Some(SyncCondition::Error),
            message: non_empty(message),
            id: String::new(),
            last_synced: prior.last_synced,
        },
    }
}

fn non_empty(message: &str) -> String {
    if message.is_empty() {
        "unknown error".to_string()
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn synced_at(hour: u32) -> SyncStatus {
        SyncStatus {
            condition: Some(SyncCondition::Created),
            message: String::new(),
            id: "42".to_string(),
            last_synced: Some(Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_success_refreshes_everything() {
        let prior = SyncStatus {
            condition: Some(SyncCondition::Error),
            message: "rate limited".to_string(),
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let status = project(&prior, &SyncOutcome::Synced { id: "42".to_string() }, now);

        assert_eq!(status.condition, Some(SyncCondition::Created));
        assert_eq!(status.id, "42");
        assert!(status.message.is_empty());
        assert_eq!(status.last_synced, Some(now));
    }

    #[test]
    fn test_failure_keeps_id_and_last_synced() {
        let prior = synced_at(1);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let status = project(
            &prior,
            &SyncOutcome::Failed {
                message: "rate limited".to_string(),
            },
            now,
        );

        assert_eq!(status.condition, Some(SyncCondition::Error));
        assert_eq!(status.message, "rate limited");
        assert_eq!(status.id, "42");
        assert_eq!(status.last_synced, prior.last_synced);
    }

    #[test]
    fn test_drift_clears_id() {
        let prior = synced_at(1);
        let status = project(
            &prior,
            &SyncOutcome::Drifted {
                message: "gone".to_string(),
            },
            Utc::now(),
        );

        assert!(status.remote_id().is_none());
        assert_eq!(status.condition, Some(SyncCondition::Error));
        assert_eq!(status.last_synced, prior.last_synced);
    }

    #[test]
    fn test_error_condition_always_has_message() {
        let status = project(
            &SyncStatus::default(),
            &SyncOutcome::Failed {
                message: String::new(),
            },
            Utc::now(),
        );
        assert!(!status.message.is_empty());
    }
}
