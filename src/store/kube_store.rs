//! Resource store backed by the Kubernetes API server

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, PostParams},
    Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};

use super::{ResourceStore, StoreError};
use crate::crd::ObjectKey;

/// [`ResourceStore`] over `kube::Api`; the API server enforces resource versions
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self::new(self.client.clone())
    }
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn api_for(&self, obj: &K) -> Api<K> {
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        self.api(&namespace)
    }
}

#[async_trait]
impl<K> ResourceStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        Ok(self.api(&key.namespace).get_opt(&key.name).await?)
    }

    async fn replace(&self, obj: &K) -> Result<K, StoreError> {
        let updated = self
            .api_for(obj)
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await?;
        Ok(updated)
    }

    async fn replace_status(&self, obj: &K) -> Result<K, StoreError> {
        let body = serde_json::to_vec(obj)?;
        let updated = self
            .api_for(obj)
            .replace_status(&obj.name_any(), &PostParams::default(), body)
            .await?;
        Ok(updated)
    }
}
