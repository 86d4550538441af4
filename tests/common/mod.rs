//! Shared fixtures for the integration tests
//!
//! - [`FakeCluster`]: in-memory secret and workload store with resourceVersion
//!   checks on secret replaces, write counters and failure injection
//! - [`StaticFetcher`]: vault item fetcher backed by a map
//! - builders for managed secrets and Deployments

#![allow(dead_code, reason = "Each test binary uses a different subset")]

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvFromSource, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, Secret,
    SecretEnvSource, SecretKeySelector, SecretVolumeSource, Volume,
};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, Once};
use vault_sync_controller::constants::{
    ITEM_NAME_ANNOTATION, ITEM_PATH_ANNOTATION, RESTART_ANNOTATION, VERSION_ANNOTATION,
};
use vault_sync_controller::controller::{
    SecretStore, SecretSynchronizer, StoreError, SyncSettings, WorkloadRef, WorkloadStore,
};
use vault_sync_controller::vault::{FetchError, Item, ItemFetcher, ItemField, ItemPath};

static RUSTLS_INIT: Once = Once::new();

/// Install the ring provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct ClusterState {
    secrets: BTreeMap<Key, Secret>,
    deployments: BTreeMap<Key, Deployment>,
    next_resource_version: u64,
    secret_writes: usize,
    patches: Vec<(WorkloadRef, BTreeMap<String, String>)>,
    fail_list_secrets: bool,
    fail_list_workloads: BTreeSet<String>,
    fail_patch: BTreeSet<Key>,
    modify_before_replace: BTreeSet<Key>,
}

impl ClusterState {
    fn bump(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }
}

/// In-memory cluster
#[derive(Default, Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_secret(&self, mut secret: Secret) {
        let mut state = self.state.lock().unwrap();
        secret.metadata.resource_version = Some(state.bump());
        let k = key(
            secret.metadata.namespace.as_deref().unwrap(),
            secret.metadata.name.as_deref().unwrap(),
        );
        state.secrets.insert(k, secret);
    }

    pub fn add_deployment(&self, mut deployment: Deployment) {
        let mut state = self.state.lock().unwrap();
        deployment.metadata.resource_version = Some(state.bump());
        let k = key(
            deployment.metadata.namespace.as_deref().unwrap(),
            deployment.metadata.name.as_deref().unwrap(),
        );
        state.deployments.insert(k, deployment);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Secret {
        self.state.lock().unwrap().secrets[&key(namespace, name)].clone()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Deployment {
        self.state.lock().unwrap().deployments[&key(namespace, name)].clone()
    }

    /// Let another writer modify the secret right before our next replace
    pub fn modify_before_next_replace(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .modify_before_replace
            .insert(key(namespace, name));
    }

    pub fn secret_writes(&self) -> usize {
        self.state.lock().unwrap().secret_writes
    }

    pub fn patches(&self) -> Vec<(WorkloadRef, BTreeMap<String, String>)> {
        self.state.lock().unwrap().patches.clone()
    }

    pub fn patch_count(&self, namespace: &str, name: &str) -> usize {
        self.patches()
            .iter()
            .filter(|(w, _)| w.namespace == namespace && w.name == name)
            .count()
    }

    pub fn writes(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.secret_writes + state.patches.len()
    }

    pub fn fail_list_secrets(&self, fail: bool) {
        self.state.lock().unwrap().fail_list_secrets = fail;
    }

    pub fn fail_list_workloads(&self, namespace: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_list_workloads
            .insert(namespace.to_string());
    }

    pub fn fail_patch(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_patch
            .insert(key(namespace, name));
    }

    /// Stop every injected listing and patch failure
    pub fn recover(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_list_secrets = false;
        state.fail_list_workloads.clear();
        state.fail_patch.clear();
    }
}

#[async_trait]
impl SecretStore for FakeCluster {
    async fn list_secrets(&self) -> Result<Vec<Secret>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_list_secrets {
            return Err(StoreError::Api {
                resource: "secrets in all namespaces".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(state.secrets.values().cloned().collect())
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let mut state = self.state.lock().unwrap();
        let k = key(
            secret.metadata.namespace.as_deref().unwrap(),
            secret.metadata.name.as_deref().unwrap(),
        );
        let resource = format!("secret {}/{}", k.0, k.1);
        if state.modify_before_replace.remove(&k) {
            let rv = state.bump();
            if let Some(current) = state.secrets.get_mut(&k) {
                current.metadata.resource_version = Some(rv);
            }
        }
        let Some(current) = state.secrets.get(&k) else {
            return Err(StoreError::NotFound { resource });
        };
        if current.metadata.resource_version != secret.metadata.resource_version {
            return Err(StoreError::Conflict {
                resource,
                message: "the object has been modified".to_string(),
            });
        }

        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(state.bump());
        state.secrets.insert(k, stored.clone());
        state.secret_writes += 1;
        Ok(stored)
    }
}

#[async_trait]
impl WorkloadStore for FakeCluster {
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Deployment>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_list_workloads.contains(namespace) {
            return Err(StoreError::Api {
                resource: format!("deployments in namespace {namespace}"),
                message: "forbidden".to_string(),
            });
        }
        Ok(state
            .deployments
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn patch_pod_template_annotations(
        &self,
        workload: &WorkloadRef,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let k = key(&workload.namespace, &workload.name);
        let resource = format!("deployment {workload}");
        if state.fail_patch.contains(&k) {
            return Err(StoreError::Api {
                resource,
                message: "admission webhook denied the request".to_string(),
            });
        }
        let rv = state.bump();
        let Some(deployment) = state.deployments.get_mut(&k) else {
            return Err(StoreError::NotFound { resource });
        };
        let template_annotations = deployment
            .spec
            .get_or_insert_with(DeploymentSpec::default)
            .template
            .metadata
            .get_or_insert_with(ObjectMeta::default)
            .annotations
            .get_or_insert_with(BTreeMap::new);
        template_annotations.extend(annotations.clone());
        deployment.metadata.resource_version = Some(rv);
        state.patches.push((workload.clone(), annotations.clone()));
        Ok(())
    }
}

/// Item fetcher serving fixed items and errors by path
#[derive(Default, Clone)]
pub struct StaticFetcher {
    responses: Arc<Mutex<BTreeMap<String, Result<Item, FetchError>>>>,
    calls: Arc<Mutex<usize>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_item(&self, vault_id: &str, item_id: &str, version: u64, fields: &[(&str, &str)]) {
        let item = Item {
            id: item_id.to_string(),
            version,
            fields: fields
                .iter()
                .map(|(label, value)| ItemField::new(*label, *value))
                .collect(),
            ..Item::default()
        };
        self.responses
            .lock()
            .unwrap()
            .insert(format!("vaults/{vault_id}/items/{item_id}"), Ok(item));
    }

    pub fn set_error(&self, vault_id: &str, item_id: &str, error: FetchError) {
        self.responses
            .lock()
            .unwrap()
            .insert(format!("vaults/{vault_id}/items/{item_id}"), Err(error));
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ItemFetcher for StaticFetcher {
    async fn fetch(&self, path: &ItemPath) -> Result<Item, FetchError> {
        *self.calls.lock().unwrap() += 1;
        self.responses
            .lock()
            .unwrap()
            .get(&path.to_string())
            .cloned()
            .unwrap_or_else(|| {
                Err(FetchError::NotFound {
                    path: path.to_string(),
                })
            })
    }
}

/// Synchronizer wired to the fakes
pub fn synchronizer(
    fetcher: &StaticFetcher,
    cluster: &FakeCluster,
    auto_restart: bool,
) -> SecretSynchronizer {
    // One shared store behind both seams, wired as the binaries do
    let store = Arc::new(cluster.clone());
    SecretSynchronizer::new(
        Arc::new(fetcher.clone()),
        Arc::clone(&store) as Arc<dyn SecretStore>,
        store,
        SyncSettings {
            auto_restart,
            max_concurrent_syncs: 4,
        },
    )
}

pub fn bytes(value: &str) -> ByteString {
    ByteString(value.as_bytes().to_vec())
}

/// Secret carrying the given annotations and data
pub fn secret(
    namespace: &str,
    name: &str,
    annotations: &[(&str, &str)],
    data: &[(&str, &str)],
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..ObjectMeta::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), bytes(v)))
                .collect(),
        ),
        ..Secret::default()
    }
}

/// Managed secret at `vaults/<vault>/items/<item>` with an optional version
pub fn managed_secret(
    namespace: &str,
    name: &str,
    vault_id: &str,
    item_id: &str,
    version: Option<&str>,
    data: &[(&str, &str)],
) -> Secret {
    let path = format!("vaults/{vault_id}/items/{item_id}");
    let mut annotations = vec![(ITEM_PATH_ANNOTATION, path.as_str())];
    if let Some(version) = version {
        annotations.push((VERSION_ANNOTATION, version));
    }
    secret(namespace, name, &annotations, data)
}

/// Deployment with a single container and the given pod spec tweaks
pub fn deployment(namespace: &str, name: &str, configure: impl FnOnce(&mut PodSpec)) -> Deployment {
    let mut pod_spec = PodSpec {
        containers: vec![Container {
            name: "app".to_string(),
            image: Some("registry.local/app:1".to_string()),
            ..Container::default()
        }],
        ..PodSpec::default()
    };
    configure(&mut pod_spec);

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta::default()),
                spec: Some(pod_spec),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

pub fn env_from_key(secret_name: &str, key: &str) -> impl FnOnce(&mut PodSpec) {
    let secret_name = secret_name.to_string();
    let key = key.to_string();
    move |spec| {
        spec.containers[0].env = Some(vec![EnvVar {
            name: "DB_PASSWORD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret_name,
                    key,
                    ..SecretKeySelector::default()
                }),
                ..EnvVarSource::default()
            }),
            ..EnvVar::default()
        }]);
    }
}

pub fn env_from_secret(secret_name: &str) -> impl FnOnce(&mut PodSpec) {
    let secret_name = secret_name.to_string();
    move |spec| {
        spec.containers[0].env_from = Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: secret_name,
                ..SecretEnvSource::default()
            }),
            ..EnvFromSource::default()
        }]);
    }
}

pub fn secret_volume(secret_name: &str) -> impl FnOnce(&mut PodSpec) {
    let secret_name = secret_name.to_string();
    move |spec| {
        spec.volumes = Some(vec![Volume {
            name: "creds".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_name),
                ..SecretVolumeSource::default()
            }),
            ..Volume::default()
        }]);
    }
}

/// Mark a Deployment's pod template with the item-name annotation
pub fn with_item_name(mut deployment: Deployment, secret_name: &str) -> Deployment {
    if let Some(spec) = deployment.spec.as_mut() {
        spec.template
            .metadata
            .get_or_insert_with(ObjectMeta::default)
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(ITEM_NAME_ANNOTATION.to_string(), secret_name.to_string());
    }
    deployment
}

/// Set an annotation on the Deployment's own metadata
pub fn with_annotation(mut deployment: Deployment, key: &str, value: &str) -> Deployment {
    deployment
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    deployment
}

/// Restart trigger currently on a Deployment's pod template
pub fn restart_trigger(deployment: &Deployment) -> Option<String> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(RESTART_ANNOTATION)
        .cloned()
}
