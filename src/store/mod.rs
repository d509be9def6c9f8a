//! Resource store contract
//!
//! The reconcilers read and write objects only through [`ResourceStore`]. Writes
//! carry the object's resource version and fail with [`StoreError::Conflict`]
//! when the stored object has moved on.

mod kube_store;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::crd::ObjectKey;
use crate::error::Interrupted;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

/// Resource store failures
#[derive(Error, Debug)]
pub enum StoreError {
    /// The object changed since it was read
    #[error("object was modified concurrently")]
    Conflict,

    /// The object no longer exists
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("Kubernetes API error: {0}")]
    Api(#[source] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call {0}")]
    Interrupted(#[from] Interrupted),
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict,
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(ae.message),
            other => StoreError::Api(other),
        }
    }
}

/// Object storage with optimistic concurrency
#[async_trait]
pub trait ResourceStore<K>: Send + Sync {
    /// Fetch the current object, `None` if it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>;

    /// Replace metadata and spec; the status is left untouched
    async fn replace(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace the status only
    async fn replace_status(&self, obj: &K) -> Result<K, StoreError>;
}
