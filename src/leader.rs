//! Lease-based leader election
//!
//! Only the replica holding the `coordination.k8s.io/v1` Lease runs controllers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::metrics;

/// Name of the lease shared by all replicas
pub const LEASE_NAME: &str = "sentry.kubernetes.jaceys.me";

/// Acquires and renews the leader lease for one replica
pub struct LeaderElector {
    api: Api<Lease>,
    identity: String,
    lease_duration: Duration,
    retry_period: Duration,
}

/// Identity of this replica: the pod name when running in a cluster
pub fn default_identity() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("sentry-operator-{}", std::process::id()))
}

/// Whether `identity` may take or keep the lease described by `spec` at `now`
pub fn is_claimable(
    spec: &LeaseSpec,
    identity: &str,
    now: DateTime<Utc>,
    default_duration: Duration,
) -> bool {
    match spec.holder_identity.as_deref() {
        None | Some("") => true,
        Some(holder) if holder == identity => true,
        Some(_) => {
            let duration = spec
                .lease_duration_seconds
                .map(|s| chrono::Duration::seconds(i64::from(s)))
                .unwrap_or_else(|| {
                    chrono::Duration::from_std(default_duration)
                        .unwrap_or_else(|_| chrono::Duration::seconds(15))
                });
            match spec.renew_time.as_ref().or(spec.acquire_time.as_ref()) {
                Some(renewed) => renewed.0 + duration < now,
                None => true,
            }
        }
    }
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, identity: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            identity: identity.into(),
            lease_duration: Duration::from_secs(15),
            retry_period: Duration::from_secs(5),
        }
    }

    /// Block until this replica holds the lease
    pub async fn acquire(&self, shutdown: &CancellationToken) -> Result<()> {
        info!(identity = %self.identity, lease = LEASE_NAME, "Waiting for leader lease");
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    metrics::LEADER.set(1.0);
                    info!(identity = %self.identity, "Acquired leader lease");
                    return Ok(());
                }
                Ok(false) => debug!("Lease held by another replica"),
                Err(e) => warn!(error = %e, "Failed to acquire lease"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    return Err(Error::LeaderElection("shut down before acquiring the lease".to_string()));
                }
                _ = tokio::time::sleep(self.retry_period) => {}
            }
        }
    }

    /// Renew the lease until shutdown. Returns an error once the lease is lost.
    pub async fn hold(&self, shutdown: CancellationToken) -> Result<()> {
        let mut last_renewal = tokio::time::Instant::now();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.release().await;
                    return Ok(());
                }
                _ = tokio::time::sleep(self.retry_period) => {}
            }

            match self.try_acquire_or_renew().await {
                Ok(true) => last_renewal = tokio::time::Instant::now(),
                Ok(false) => {
                    metrics::LEADER.set(0.0);
                    return Err(Error::LeaderElection(
                        "lease taken over by another replica".to_string(),
                    ));
                }
                Err(e) if last_renewal.elapsed() < self.lease_duration => {
                    warn!(error = %e, "Failed to renew lease, retrying");
                }
                Err(e) => {
                    metrics::LEADER.set(0.0);
                    return Err(Error::LeaderElection(format!(
                        "could not renew lease within {:?}: {}",
                        self.lease_duration, e
                    )));
                }
            }
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool> {
        let now = Utc::now();
        let duration_secs = i32::try_from(self.lease_duration.as_secs()).unwrap_or(i32::MAX);

        let Some(mut lease) = self.api.get_opt(LEASE_NAME).await? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(LEASE_NAME.to_string()),
                    ..Default::default()
                },
                spec: Some(LeaseSpec {
                    holder_identity: Some(self.identity.clone()),
                    lease_duration_seconds: Some(duration_secs),
                    acquire_time: Some(MicroTime(now)),
                    renew_time: Some(MicroTime(now)),
                    lease_transitions: Some(0),
                    ..Default::default()
                }),
            };
            return match self.api.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(true),
                Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
                Err(e) => Err(e.into()),
            };
        };

        let spec = lease.spec.clone().unwrap_or_default();
        if !is_claimable(&spec, &self.identity, now, self.lease_duration) {
            return Ok(false);
        }

        let held_by_us = spec.holder_identity.as_deref() == Some(self.identity.as_str());
        lease.spec = Some(LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(duration_secs),
            renew_time: Some(MicroTime(now)),
            acquire_time: if held_by_us {
                spec.acquire_time.clone()
            } else {
                Some(MicroTime(now))
            },
            lease_transitions: if held_by_us {
                spec.lease_transitions
            } else {
                Some(spec.lease_transitions.unwrap_or(0) + 1)
            },
            ..spec
        });

        match self
            .api
            .replace(LEASE_NAME, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Give up the lease so another replica can take over immediately
    pub async fn release(&self) {
        let Ok(Some(mut lease)) = self.api.get_opt(LEASE_NAME).await else {
            return;
        };
        let Some(spec) = lease.spec.as_mut() else {
            return;
        };
        if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
            return;
        }
        spec.holder_identity = None;
        spec.renew_time = None;

        match self
            .api
            .replace(LEASE_NAME, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => info!("Released leader lease"),
            Err(e) => warn!(error = %e, "Failed to release leader lease"),
        }
        metrics::LEADER.set(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held_by(holder: &str, renewed_secs_ago: i64) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(holder.to_string()),
            lease_duration_seconds: Some(15),
            renew_time: Some(MicroTime(Utc::now() - chrono::Duration::seconds(renewed_secs_ago))),
            ..Default::default()
        }
    }

    #[test]
    fn test_unheld_lease_is_claimable() {
        let spec = LeaseSpec::default();
        assert!(is_claimable(&spec, "a", Utc::now(), Duration::from_secs(15)));
    }

    #[test]
    fn test_own_lease_is_renewable() {
        let spec = held_by("a", 1);
        assert!(is_claimable(&spec, "a", Utc::now(), Duration::from_secs(15)));
    }

    #[test]
    fn test_fresh_foreign_lease_is_not_claimable() {
        let spec = held_by("b", 1);
        assert!(!is_claimable(&spec, "a", Utc::now(), Duration::from_secs(15)));
    }

    #[test]
    fn test_expired_foreign_lease_is_claimable() {
        let spec = held_by("b", 60);
        assert!(is_claimable(&spec, "a", Utc::now(), Duration::from_secs(15)));
    }
}
