//! Reconcilers for Sentry CRDs
//!
//! This module contains the business logic for keeping Sentry in line with
//! the declared resources. Reconcilers are responsible for:
//! - Validating CRD specs
//! - Creating, adopting, updating and deleting the Sentry objects
//! - Managing the cleanup finalizer
//! - Updating resource status

mod engine;
pub mod finalizer;
pub mod project;
pub mod status;
pub mod team;

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::{de::DeserializeOwned, Serialize};

use crate::crd::Synced;
use crate::error::Result;
use crate::sentry::{Sentry, SentryResult};

pub use engine::{ReconcileConfig, Reconciler};
pub use finalizer::{FinalizerSet, FINALIZER_NAME};

/// The Sentry object a resource is bound to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteRef {
    pub id: String,
    pub slug: String,
    /// Found by slug rather than created by this call
    pub adopted: bool,
}

impl RemoteRef {
    pub fn created(id: String, slug: String) -> Self {
        Self {
            id,
            slug,
            adopted: false,
        }
    }

    pub fn adopted(id: String, slug: String) -> Self {
        Self {
            id,
            slug,
            adopted: true,
        }
    }
}

/// A resource kind that mirrors an object in Sentry
#[async_trait]
pub trait SentryResource:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Synced
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Reject specs Sentry would never accept
    fn validate(&self) -> Result<()>;

    /// Create the Sentry object, adopting an existing one with the same slug
    async fn create(&self, sentry: &Sentry) -> SentryResult<RemoteRef>;

    /// Bring the Sentry object with `id` in line with the spec.
    ///
    /// Returns `None` when Sentry no longer has an object with `id`. Any other
    /// `NotFound`, such as a missing owning team, is an ordinary failure.
    async fn update(&self, sentry: &Sentry, id: &str) -> SentryResult<Option<RemoteRef>>;

    /// Delete the Sentry object this resource owns, if there is one.
    /// `NotFound` from Sentry means it is already gone.
    async fn delete(&self, sentry: &Sentry, id: Option<&str>) -> SentryResult<()>;
}
