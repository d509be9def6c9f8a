//! In-memory resource store with Kubernetes write semantics

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Resource;

use super::{ResourceStore, StoreError};
use crate::crd::{ObjectKey, Synced};

type WriteHook<K> = Box<dyn FnOnce(&mut K) + Send>;

struct Inner<K> {
    objects: BTreeMap<ObjectKey, K>,
    next_version: u64,
    interleave: Option<WriteHook<K>>,
    fail_next: Option<String>,
    writes: usize,
}

impl<K: Resource + Clone> Inner<K> {
    fn bump(&mut self, obj: &mut K) {
        self.next_version += 1;
        obj.meta_mut().resource_version = Some(self.next_version.to_string());
    }

    /// Run hooks queued for the next write
    fn before_write(&mut self, key: &ObjectKey) -> Result<(), StoreError> {
        if let Some(reason) = self.fail_next.take() {
            return Err(StoreError::Unavailable(reason));
        }
        if let Some(hook) = self.interleave.take() {
            if let Some(mut stored) = self.objects.remove(key) {
                hook(&mut stored);
                self.bump(&mut stored);
                self.objects.insert(key.clone(), stored);
            }
        }
        Ok(())
    }

    fn current(&self, key: &ObjectKey, obj: &K) -> Result<&K, StoreError> {
        let stored = self
            .objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if stored.meta().resource_version != obj.meta().resource_version {
            return Err(StoreError::Conflict);
        }
        Ok(stored)
    }

    /// Persist a written object, dropping it once deletion may complete
    fn commit(&mut self, key: ObjectKey, mut obj: K) -> K {
        self.bump(&mut obj);
        self.writes += 1;
        if is_releasable(&obj) {
            self.objects.remove(&key);
        } else {
            self.objects.insert(key, obj.clone());
        }
        obj
    }
}

fn is_releasable<K: Resource>(obj: &K) -> bool {
    let meta = obj.meta();
    meta.deletion_timestamp.is_some() && meta.finalizers.as_ref().map_or(true, Vec::is_empty)
}

/// [`ResourceStore`] held in memory.
///
/// Mirrors the API server: `replace` ignores status, `replace_status` ignores
/// everything else, stale resource versions conflict, and an object is removed
/// once deletion was requested and its finalizers are gone.
pub struct MemoryStore<K> {
    inner: Mutex<Inner<K>>,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects: BTreeMap::new(),
                next_version: 0,
                interleave: None,
                fail_next: None,
                writes: 0,
            }),
        }
    }
}

impl<K> MemoryStore<K>
where
    K: Resource + Synced + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an object, as a user submitting it would
    pub fn insert(&self, mut obj: K) -> K {
        let key = ObjectKey::from_resource(&obj);
        let mut inner = self.lock();
        inner.bump(&mut obj);
        inner.objects.insert(key, obj.clone());
        obj
    }

    /// Current stored object
    pub fn snapshot(&self, key: &ObjectKey) -> Option<K> {
        self.lock().objects.get(key).cloned()
    }

    /// Request deletion: removes the object right away if nothing blocks it,
    /// otherwise sets the deletion timestamp
    pub fn request_deletion(&self, key: &ObjectKey) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(mut obj) = inner.objects.remove(key) else {
            return;
        };
        if obj.meta().deletion_timestamp.is_none() {
            obj.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
        }
        if !is_releasable(&obj) {
            inner.bump(&mut obj);
            inner.objects.insert(key.clone(), obj);
        }
    }

    /// Apply `hook` to the stored object right before the next write lands,
    /// so that write sees a concurrent modification
    pub fn interleave_next_write(&self, hook: impl FnOnce(&mut K) + Send + 'static) {
        self.lock().interleave = Some(Box::new(hook));
    }

    /// Fail the next write without applying it
    pub fn fail_next_write(&self, reason: impl Into<String>) {
        self.lock().fail_next = Some(reason.into());
    }

    /// Number of committed writes
    pub fn writes(&self) -> usize {
        self.lock().writes
    }
}

#[async_trait]
impl<K> ResourceStore<K> for MemoryStore<K>
where
    K: Resource + Synced + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        Ok(self.snapshot(key))
    }

    async fn replace(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::from_resource(obj);
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.before_write(&key)?;
        let stored = inner.current(&key, obj)?;

        let mut next = obj.clone();
        *next.sync_status_mut() = stored.sync_status().cloned();
        next.meta_mut().deletion_timestamp = stored.meta().deletion_timestamp.clone();
        Ok(inner.commit(key, next))
    }

    async fn replace_status(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::from_resource(obj);
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.before_write(&key)?;
        let mut next = inner.current(&key, obj)?.clone();

        *next.sync_status_mut() = obj.sync_status().cloned();
        Ok(inner.commit(key, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Project, ProjectSpec, SyncStatus};

    fn project() -> Project {
        let mut project = Project::new(
            "alpha",
            ProjectSpec {
                name: "Alpha".to_string(),
                slug: "alpha".to_string(),
                team: "core".to_string(),
            },
        );
        project.metadata.namespace = Some("default".to_string());
        project
    }

    fn key() -> ObjectKey {
        ObjectKey::new("default", "alpha")
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let store = MemoryStore::new();
        let stale = store.insert(project());

        let mut fresh = stale.clone();
        fresh.metadata.labels = Some([("a".to_string(), "b".to_string())].into());
        store.replace(&fresh).await.unwrap();

        let err = store.replace(&stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn test_replace_ignores_status_and_replace_status_ignores_spec() {
        let store = MemoryStore::new();
        let mut obj = store.insert(project());

        obj.status = Some(SyncStatus {
            id: "42".to_string(),
            ..Default::default()
        });
        obj.spec.name = "Renamed".to_string();
        let written = store.replace(&obj).await.unwrap();
        assert!(written.status.is_none());
        assert_eq!(written.spec.name, "Renamed");

        let mut obj = written;
        obj.status = Some(SyncStatus {
            id: "42".to_string(),
            ..Default::default()
        });
        obj.spec.name = "Ignored".to_string();
        let written = store.replace_status(&obj).await.unwrap();
        assert_eq!(written.spec.name, "Renamed");
        assert_eq!(written.status.unwrap().id, "42");
    }

    #[tokio::test]
    async fn test_object_removed_once_finalizers_clear() {
        let store = MemoryStore::new();
        let mut obj = project();
        obj.metadata.finalizers = Some(vec!["example.com/cleanup".to_string()]);
        store.insert(obj);

        store.request_deletion(&key());
        let mut pending = store.snapshot(&key()).unwrap();
        assert!(pending.metadata.deletion_timestamp.is_some());

        pending.metadata.finalizers = Some(vec![]);
        store.replace(&pending).await.unwrap();
        assert!(store.snapshot(&key()).is_none());
    }

    #[tokio::test]
    async fn test_deletion_without_finalizers_is_immediate() {
        let store = MemoryStore::new();
        store.insert(project());
        store.request_deletion(&key());
        assert!(store.get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interleaved_write_causes_conflict() {
        let store = MemoryStore::new();
        let obj = store.insert(project());
        store.interleave_next_write(|p: &mut Project| p.spec.name = "Concurrent".to_string());

        let err = store.replace_status(&obj).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
        assert_eq!(store.snapshot(&key()).unwrap().spec.name, "Concurrent");
        assert_eq!(store.writes(), 0);
    }
}
