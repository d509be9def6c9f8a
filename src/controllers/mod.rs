//! Kubernetes controllers for Sentry CRDs
//!
//! This module wires the reconcilers into `kube::runtime::Controller`, which
//! watches the CRDs, serializes invocations per object and applies the requeue
//! delays chosen by [`error_policy`].

mod backoff;

pub use backoff::{BackoffPolicy, BackoffTracker};

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::OperatorConfig;
use crate::crd::{ObjectKey, Project, Registry, Team};
use crate::error::{Error, Result, RetryClass};
use crate::metrics;
use crate::reconcilers::{ReconcileConfig, Reconciler, SentryResource};
use crate::sentry::Sentry;
use crate::store::KubeStore;

/// Shared context for all controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Sentry client bound to the managed organization
    pub sentry: Sentry,
    /// Kinds this operator manages
    pub registry: Registry,
    pub reconcile: ReconcileConfig,
    /// Requeue delay for failures only a spec change can fix
    pub terminal_requeue: Duration,
    pub backoff: BackoffTracker,
    /// Cancelled on shutdown; aborts in-flight calls
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        sentry: Sentry,
        registry: Registry,
        config: &OperatorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            sentry,
            registry,
            reconcile: config.reconcile(),
            terminal_requeue: config.terminal_requeue(),
            backoff: BackoffTracker::new(config.backoff()),
            shutdown,
        }
    }

    fn reconciler<K: SentryResource>(&self) -> Reconciler<K, KubeStore<K>> {
        Reconciler::new(
            KubeStore::new(self.client.clone()),
            self.sentry.clone(),
            self.reconcile.clone(),
        )
        .with_cancellation(self.shutdown.clone())
    }
}

/// Run the Team controller
pub async fn run_team_controller(context: Arc<Context>) {
    run::<Team>(context).await
}

/// Run the Project controller
pub async fn run_project_controller(context: Arc<Context>) {
    run::<Project>(context).await
}

/// Name of the CRD serving `K`, as listed in the [`Registry`]
fn crd_name<K: SentryResource>() -> String {
    format!("{}.{}", K::plural(&()), K::group(&()))
}

async fn run<K: SentryResource>(context: Arc<Context>) {
    let kind = K::kind(&()).to_string();
    let crd = crd_name::<K>();
    if !context.registry.contains(&crd) {
        error!(kind = %kind, crd = %crd, "Kind is not registered, not starting its controller");
        return;
    }
    let api: Api<K> = Api::all(context.client.clone());

    info!(kind = %kind, "Starting controller");

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, context)
        .for_each(|result| {
            let kind = kind.clone();
            async move {
                match result {
                    Ok((obj, action)) => {
                        info!(
                            kind = %kind,
                            name = %obj.name,
                            namespace = obj.namespace.as_deref().unwrap_or("default"),
                            requeue = ?action,
                            "Reconciled"
                        );
                    }
                    Err(e) => {
                        error!(kind = %kind, error = %e, "Reconciliation error");
                    }
                }
            }
        })
        .await;

    info!(kind = %kind, "Controller stopped");
}

fn backoff_key<K: SentryResource>(obj: &K) -> String {
    format!("{}/{}", K::kind(&()), ObjectKey::from_resource(obj))
}

/// Main reconciliation function
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile<K: SentryResource>(obj: Arc<K>, ctx: Arc<Context>) -> Result<Action> {
    let kind = K::kind(&()).to_string();
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[kind.as_str()])
        .start_timer();
    metrics::RECONCILIATIONS
        .with_label_values(&[kind.as_str()])
        .inc();

    // Work from a fresh read rather than the possibly stale watch cache
    let key = ObjectKey::from_resource(obj.as_ref());
    let action = ctx.reconciler::<K>().reconcile(&key).await?;
    ctx.backoff.reset(&backoff_key(obj.as_ref()));
    Ok(action)
}

/// Error policy for the controller
fn error_policy<K: SentryResource>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    let kind = K::kind(&()).to_string();
    let key = backoff_key(obj.as_ref());
    let class = error.retry_class();

    let requeue_after = match class {
        RetryClass::Backoff => ctx.backoff.next_delay(&key),
        RetryClass::Terminal => {
            ctx.backoff.reset(&key);
            ctx.terminal_requeue
        }
    };

    metrics::RECONCILIATION_ERRORS
        .with_label_values(&[kind.as_str(), class.as_str()])
        .inc();
    warn!(
        key = %key,
        error = %error,
        class = class.as_str(),
        requeue_after = ?requeue_after,
        "Reconciliation failed, scheduling retry"
    );

    Action::requeue(requeue_after)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crd_names_match_registry() {
        let registry = Registry::with_sentry_kinds();
        assert!(registry.contains(&crd_name::<Team>()));
        assert!(registry.contains(&crd_name::<Project>()));
        assert_eq!(crd_name::<Project>(), "projects.sentry.kubernetes.jaceys.me");
    }

    #[test]
    fn test_unregistered_kind_is_detected() {
        let registry = Registry::new().register::<Team>();
        assert!(!registry.contains(&crd_name::<Project>()));
    }
}
