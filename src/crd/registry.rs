//! Explicit registry of the resource kinds this operator manages

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Api, Client, CustomResourceExt};
use tracing::{debug, error};

use crate::error::{Error, Result};

use super::{Project, Team};

/// A kind known to the registry
#[derive(Clone, Debug)]
pub struct RegisteredKind {
    pub kind: &'static str,
    pub crd: CustomResourceDefinition,
}

/// Registered resource kinds, built once at startup and passed to whoever needs them
#[derive(Clone, Debug, Default)]
pub struct Registry {
    kinds: Vec<RegisteredKind>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every kind the operator reconciles
    pub fn with_sentry_kinds() -> Self {
        Self::new().register::<Team>().register::<Project>()
    }

    /// Register a custom resource type. Registering the same kind twice is a no-op.
    pub fn register<K: CustomResourceExt>(mut self) -> Self {
        let crd = K::crd();
        let kind = K::crd_name();
        if !self.kinds.iter().any(|k| k.kind == kind) {
            self.kinds.push(RegisteredKind { kind, crd });
        }
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &RegisteredKind> {
        self.kinds.iter()
    }

    pub fn crds(&self) -> Vec<CustomResourceDefinition> {
        self.kinds.iter().map(|k| k.crd.clone()).collect()
    }

    pub fn contains(&self, crd_name: &str) -> bool {
        self.kinds.iter().any(|k| k.kind == crd_name)
    }

    /// Render every CRD as a YAML document
    pub fn to_yaml(&self) -> Result<Vec<String>> {
        self.kinds
            .iter()
            .map(|k| serde_yaml::to_string(&k.crd).map_err(Error::from))
            .collect()
    }

    /// Check that every registered CRD is installed in the cluster
    pub async fn verify_installed(&self, client: &Client) -> Result<()> {
        let api: Api<CustomResourceDefinition> = Api::all(client.clone());
        for registered in &self.kinds {
            match api.get_opt(registered.kind).await? {
                Some(_) => debug!(crd = registered.kind, "CRD installed"),
                None => {
                    error!(crd = registered.kind, "CRD not installed");
                    return Err(Error::config(format!(
                        "CRD {} is not installed; apply the output of crdgen first",
                        registered.kind
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentry_kinds_are_registered_once() {
        let registry = Registry::with_sentry_kinds().register::<Team>();
        let names: Vec<_> = registry.kinds().map(|k| k.kind).collect();
        assert_eq!(
            names,
            vec![
                "teams.sentry.kubernetes.jaceys.me",
                "projects.sentry.kubernetes.jaceys.me"
            ]
        );
        assert!(registry.contains("projects.sentry.kubernetes.jaceys.me"));
    }

    #[test]
    fn test_yaml_has_status_subresource() {
        let docs = Registry::with_sentry_kinds().to_yaml().unwrap();
        assert_eq!(docs.len(), 2);
        for doc in docs {
            assert!(doc.contains("kind: CustomResourceDefinition"));
            assert!(doc.contains("subresources"));
            assert!(doc.contains("lastSynced"));
        }
    }
}
