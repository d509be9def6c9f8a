//! Reconciliation state machine shared by every Sentry-backed kind

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use chrono::Utc;
use kube::runtime::controller::Action;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::finalizer::{FinalizerSet, FINALIZER_NAME};
use super::status::{self, SyncOutcome};
use super::SentryResource;
use crate::crd::{ObjectKey, SyncStatus};
use crate::error::{Error, Interrupted, Result};
use crate::metrics;
use crate::sentry::{Sentry, SentryError};
use crate::store::{ResourceStore, StoreError};

/// Tuning for a single reconcile invocation
#[derive(Clone, Debug)]
pub struct ReconcileConfig {
    /// Upper bound for every store and Sentry call
    pub call_timeout: Duration,
    /// Requeue interval after a successful sync, to notice drift
    pub resync_interval: Duration,
    /// Attempts before a run of version conflicts is reported as an error
    pub max_conflict_retries: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            resync_interval: Duration::from_secs(600),
            max_conflict_retries: 5,
        }
    }
}

/// Drives one kind of resource towards its Sentry counterpart.
///
/// Assumes invocations for the same key never overlap; no locking is done here.
pub struct Reconciler<K, S> {
    store: S,
    sentry: Sentry,
    config: ReconcileConfig,
    cancel: CancellationToken,
    _kind: PhantomData<fn() -> K>,
}

impl<K, S> Reconciler<K, S>
where
    K: SentryResource,
    S: ResourceStore<K>,
{
    pub fn new(store: S, sentry: Sentry, config: ReconcileConfig) -> Self {
        Self {
            store,
            sentry,
            config,
            cancel: CancellationToken::new(),
            _kind: PhantomData,
        }
    }

    /// Abort in-flight calls once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconcile the object stored under `key`.
    ///
    /// A missing object is a no-op. Version conflicts restart the whole pass
    /// from a fresh read, up to `max_conflict_retries` times.
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.reconcile_once(key).await {
                Err(Error::Store(StoreError::Conflict))
                    if attempts < self.config.max_conflict_retries =>
                {
                    debug!(attempt = attempts, "Object changed underneath us, re-reading");
                }
                Err(Error::Store(StoreError::Conflict)) => {
                    return Err(Error::ConflictRetriesExhausted {
                        key: key.to_string(),
                        attempts,
                    });
                }
                Err(Error::Store(StoreError::NotFound(_))) => {
                    debug!("Object disappeared during reconciliation");
                    return Ok(Action::await_change());
                }
                other => return other,
            }
        }
    }

    async fn reconcile_once(&self, key: &ObjectKey) -> Result<Action> {
        let Some(obj) = self.bounded(self.store.get(key)).await? else {
            debug!("Object no longer exists");
            return Ok(Action::await_change());
        };

        let mut finalizers = FinalizerSet::from_meta(obj.meta());

        if obj.meta().deletion_timestamp.is_some() {
            if !finalizers.contains(FINALIZER_NAME) {
                return Ok(Action::await_change());
            }
            return self.cleanup(key, &obj).await;
        }

        // The marker must be persisted before anything exists in Sentry
        if finalizers.add(FINALIZER_NAME) {
            let mut updated = obj.clone();
            finalizers.apply_to(updated.meta_mut());
            self.bounded(self.store.replace(&updated)).await?;
            info!("Added finalizer");
            return Ok(Action::requeue(Duration::ZERO));
        }

        self.sync(&obj).await
    }

    async fn sync(&self, obj: &K) -> Result<Action> {
        let kind = K::kind(&()).to_string();
        let prior = obj.sync_status().cloned().unwrap_or_default();

        if let Err(e) = obj.validate() {
            warn!(error = %e, "Validation failed");
            self.write_status(obj, &prior, SyncOutcome::Failed { message: e.to_string() })
                .await?;
            return Err(e);
        }

        let result = match prior.remote_id() {
            None => {
                let result = self.bounded(obj.create(&self.sentry)).await;
                record(&kind, "create", result.as_ref().map_or_else(outcome, |_| "success"));
                result
            }
            Some(id) => {
                let result = self.bounded(obj.update(&self.sentry, id)).await;
                match result {
                    Ok(Some(remote)) => {
                        record(&kind, "update", "success");
                        Ok(remote)
                    }
                    Ok(None) => {
                        record(&kind, "update", "not_found");
                        warn!(id = %id, "Sentry no longer has this object, will recreate");
                        let message = format!("{} {} not found in Sentry, recreating", kind, id);
                        self.write_status(obj, &prior, SyncOutcome::Drifted { message })
                            .await?;
                        return Ok(Action::requeue(Duration::ZERO));
                    }
                    Err(e) => {
                        record(&kind, "update", outcome(&e));
                        Err(e)
                    }
                }
            }
        };

        match result {
            Ok(remote) => {
                info!(id = %remote.id, slug = %remote.slug, adopted = remote.adopted, "Synced with Sentry");
                self.write_status(obj, &prior, SyncOutcome::Synced { id: remote.id })
                    .await?;
                Ok(Action::requeue(self.config.resync_interval))
            }
            Err(e) => {
                warn!(error = %e, class = ?e.class(), "Sync with Sentry failed");
                self.write_status(obj, &prior, SyncOutcome::Failed { message: e.to_string() })
                    .await?;
                Err(Error::Sentry(e))
            }
        }
    }

    async fn cleanup(&self, key: &ObjectKey, obj: &K) -> Result<Action> {
        let kind = K::kind(&()).to_string();
        let prior = obj.sync_status().cloned().unwrap_or_default();
        info!(id = prior.remote_id().unwrap_or_default(), "Deleting from Sentry");

        let result = self
            .bounded(obj.delete(&self.sentry, prior.remote_id()))
            .await;
        record(&kind, "delete", result.as_ref().map_or_else(outcome, |_| "success"));

        match result {
            Ok(()) => {}
            Err(e) if e.is_not_found() => info!("Already absent from Sentry"),
            Err(e) => {
                // Keep the finalizer: dropping it would leak the Sentry object
                warn!(error = %e, "Delete from Sentry failed");
                self.write_status(obj, &prior, SyncOutcome::Failed { message: e.to_string() })
                    .await?;
                return Err(Error::Sentry(e));
            }
        }

        self.release_finalizer(key, obj.clone()).await?;
        metrics::CLEANUPS.with_label_values(&[kind.as_str()]).inc();
        info!("Removed finalizer");
        Ok(Action::await_change())
    }

    /// Remove the marker, re-reading and re-applying on conflict
    async fn release_finalizer(&self, key: &ObjectKey, mut current: K) -> Result<()> {
        for attempt in 1..=self.config.max_conflict_retries {
            let mut finalizers = FinalizerSet::from_meta(current.meta());
            if !finalizers.remove(FINALIZER_NAME) {
                return Ok(());
            }
            let mut updated = current.clone();
            finalizers.apply_to(updated.meta_mut());

            match self.bounded(self.store.replace(&updated)).await {
                Ok(_) | Err(StoreError::NotFound(_)) => return Ok(()),
                Err(StoreError::Conflict) => {
                    debug!(attempt, "Conflict removing finalizer, re-reading");
                    match self.bounded(self.store.get(key)).await? {
                        Some(fresh) => current = fresh,
                        None => return Ok(()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::ConflictRetriesExhausted {
            key: key.to_string(),
            attempts: self.config.max_conflict_retries,
        })
    }

    async fn write_status(&self, obj: &K, prior: &SyncStatus, outcome: SyncOutcome) -> Result<()> {
        let next = status::project(prior, &outcome, Utc::now());
        if obj.sync_status() == Some(&next) {
            return Ok(());
        }
        let mut updated = obj.clone();
        *updated.sync_status_mut() = Some(next);
        self.bounded(self.store.replace_status(&updated)).await?;
        Ok(())
    }

    /// Run `fut` under the call timeout, giving up early on cancellation
    async fn bounded<T, E, F>(&self, fut: F) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: From<Interrupted>,
    {
        let timeout = self.config.call_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled.into()),
            res = tokio::time::timeout(timeout, fut) => {
                res.unwrap_or_else(|_| Err(Interrupted::TimedOut(timeout).into()))
            }
        }
    }
}

fn outcome(err: &SentryError) -> &'static str {
    if err.is_not_found() {
        "not_found"
    } else {
        "failure"
    }
}

fn record(kind: &str, operation: &str, outcome: &str) {
    metrics::SENTRY_OPERATIONS
        .with_label_values(&[kind, operation, outcome])
        .inc();
}
