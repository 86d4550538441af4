//! # Cluster Stores
//!
//! Seams between the sync engine and the Kubernetes API.
//!
//! - [`SecretStore`]: list secrets in scope, replace one secret
//! - [`WorkloadStore`]: list Deployments of a namespace, patch pod-template annotations
//!
//! [`KubeStore`] implements both against a live cluster. Secret replaces carry
//! the resourceVersion that was read, so a concurrent modification surfaces as
//! [`StoreError::Conflict`] and is retried on the next cycle. Restart patches
//! carry no precondition, like `kubectl rollout restart`.

use crate::config::NamespaceScope;
use crate::constants::FIELD_MANAGER;
use crate::controller::types::{StoreError, WorkloadRef};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::debug;

/// Cluster secret store
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// List every secret in the configured namespace scope
    async fn list_secrets(&self) -> Result<Vec<Secret>, StoreError>;

    /// Replace a secret with `secret`, guarded by its resourceVersion
    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;
}

/// Cluster workload store
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    /// List the Deployments of `namespace`
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Deployment>, StoreError>;

    /// Merge `annotations` into the pod template of `workload`
    async fn patch_pod_template_annotations(
        &self,
        workload: &WorkloadRef,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), StoreError>;
}

/// Secret and workload store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    scope: NamespaceScope,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client, scope: NamespaceScope) -> Self {
        Self { client, scope }
    }
}

/// Merge patch touching only the pod-template annotations
fn pod_template_annotations_patch(annotations: &BTreeMap<String, String>) -> serde_json::Value {
    serde_json::json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": annotations
                }
            }
        }
    })
}

#[async_trait]
impl SecretStore for KubeStore {
    async fn list_secrets(&self) -> Result<Vec<Secret>, StoreError> {
        let params = ListParams::default();
        match &self.scope {
            NamespaceScope::All => {
                let api: Api<Secret> = Api::all(self.client.clone());
                let list = api
                    .list(&params)
                    .await
                    .map_err(|e| StoreError::from_kube("secrets in all namespaces", &e))?;
                Ok(list.items)
            }
            NamespaceScope::Namespaces(namespaces) => {
                let mut secrets = Vec::new();
                for namespace in namespaces {
                    let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                    let list = api.list(&params).await.map_err(|e| {
                        StoreError::from_kube(format!("secrets in namespace {namespace}"), &e)
                    })?;
                    debug!(
                        "Listed {} secret(s) in namespace {}",
                        list.items.len(),
                        namespace
                    );
                    secrets.extend(list.items);
                }
                Ok(secrets)
            }
        }
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let namespace = secret.metadata.namespace.as_deref().unwrap_or("default");
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        let resource = format!("secret {namespace}/{name}");

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PostParams::default()
        };
        api.replace(name, &params, secret)
            .await
            .map_err(|e| StoreError::from_kube(resource, &e))
    }
}

#[async_trait]
impl WorkloadStore for KubeStore {
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Deployment>, StoreError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await.map_err(|e| {
            StoreError::from_kube(format!("deployments in namespace {namespace}"), &e)
        })?;
        Ok(list.items)
    }

    async fn patch_pod_template_annotations(
        &self,
        workload: &WorkloadRef,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &workload.namespace);
        let patch = pod_template_annotations_patch(annotations);
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PatchParams::default()
        };

        api.patch(&workload.name, &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(format!("deployment {workload}"), &e))?;
        Ok(())
    }
}
