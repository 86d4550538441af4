//! # Restart Resolver
//!
//! Decides which workloads consume a secret and therefore must be rolled when
//! it changes.
//!
//! A workload references a secret when any of these hold:
//!
//! | Mechanism | Where |
//! |-----------|-------|
//! | [`ReferenceKind::Annotation`] | item-name annotation on the Deployment or its pod template |
//! | [`ReferenceKind::Env`] | `containers[].env[].valueFrom.secretKeyRef.name` |
//! | [`ReferenceKind::EnvFrom`] | `containers[].envFrom[].secretRef.name` |
//! | [`ReferenceKind::Volume`] | `volumes[].secret.secretName` (or a projected secret source) |
//!
//! All predicates are evaluated for every workload so the full set of matching
//! mechanisms can be reported; one match is enough to schedule a restart.
//! Init containers are scanned alongside regular containers.

use crate::config::parse_bool_flag;
use crate::constants::{ITEM_NAME_ANNOTATION, RESTART_DEPLOYMENTS_ANNOTATION};
use crate::controller::types::WorkloadRef;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, PodSpec};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// How a workload references a secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReferenceKind {
    /// Declarative item-name annotation
    Annotation,
    /// Single key via `env[].valueFrom.secretKeyRef`
    Env,
    /// Whole secret via `envFrom[].secretRef`
    EnvFrom,
    /// Secret-backed volume
    Volume,
}

impl ReferenceKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Annotation => "annotation",
            ReferenceKind::Env => "env",
            ReferenceKind::EnvFrom => "env-from",
            ReferenceKind::Volume => "volume",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workload that references a secret, with every mechanism that matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadMatch {
    pub workload: WorkloadRef,
    pub kinds: BTreeSet<ReferenceKind>,
}

fn pod_spec(workload: &Deployment) -> Option<&PodSpec> {
    workload.spec.as_ref()?.template.spec.as_ref()
}

fn all_containers(workload: &Deployment) -> impl Iterator<Item = &Container> {
    pod_spec(workload).into_iter().flat_map(|spec| {
        spec.containers
            .iter()
            .chain(spec.init_containers.iter().flatten())
    })
}

/// Values of an annotation on the Deployment metadata, then on its pod template
fn workload_annotations<'a>(
    workload: &'a Deployment,
    key: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    let own = workload.metadata.annotations.as_ref();
    let template = workload
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.annotations.as_ref());
    [own, template]
        .into_iter()
        .flatten()
        .filter_map(move |a| a.get(key))
        .map(String::as_str)
}

/// The workload declares `secret_name` through the item-name annotation
#[must_use]
pub fn references_by_annotation(workload: &Deployment, secret_name: &str) -> bool {
    workload_annotations(workload, ITEM_NAME_ANNOTATION).any(|name| name == secret_name)
}

/// A container sources an environment value from a key of `secret_name`
#[must_use]
pub fn references_by_env(workload: &Deployment, secret_name: &str) -> bool {
    all_containers(workload)
        .flat_map(|c| c.env.iter().flatten())
        .filter_map(|env| env.value_from.as_ref()?.secret_key_ref.as_ref())
        .any(|selector| selector.name == secret_name)
}

/// A container imports the whole of `secret_name` via `envFrom`
#[must_use]
pub fn references_by_env_from(workload: &Deployment, secret_name: &str) -> bool {
    all_containers(workload)
        .flat_map(|c| c.env_from.iter().flatten())
        .filter_map(|source| source.secret_ref.as_ref())
        .any(|secret_ref| secret_ref.name == secret_name)
}

/// A pod volume is backed by `secret_name`
#[must_use]
pub fn references_by_volume(workload: &Deployment, secret_name: &str) -> bool {
    pod_spec(workload)
        .and_then(|spec| spec.volumes.as_ref())
        .into_iter()
        .flatten()
        .any(|volume| {
            let direct = volume
                .secret
                .as_ref()
                .and_then(|s| s.secret_name.as_deref())
                == Some(secret_name);
            let projected = volume
                .projected
                .as_ref()
                .and_then(|p| p.sources.as_ref())
                .into_iter()
                .flatten()
                .filter_map(|source| source.secret.as_ref())
                .any(|projection| projection.name == secret_name);
            direct || projected
        })
}

/// Every mechanism through which `workload` references `secret_name`
#[must_use]
pub fn reference_kinds(workload: &Deployment, secret_name: &str) -> BTreeSet<ReferenceKind> {
    let checks: [(ReferenceKind, fn(&Deployment, &str) -> bool); 4] = [
        (ReferenceKind::Annotation, references_by_annotation),
        (ReferenceKind::Env, references_by_env),
        (ReferenceKind::EnvFrom, references_by_env_from),
        (ReferenceKind::Volume, references_by_volume),
    ];

    checks
        .into_iter()
        .filter(|(_, check)| check(workload, secret_name))
        .map(|(kind, _)| kind)
        .collect()
}

/// Workloads of `namespace` that reference secret `secret_name`
///
/// Workloads outside `namespace` are ignored (secret references are namespace
/// local). The result holds each workload at most once, ordered by identity.
#[must_use]
pub fn resolve(secret_name: &str, namespace: &str, workloads: &[Deployment]) -> Vec<WorkloadMatch> {
    let mut matches: BTreeMap<WorkloadRef, BTreeSet<ReferenceKind>> = BTreeMap::new();

    for workload in workloads {
        let Some(workload_ref) = WorkloadRef::of_workload(workload) else {
            continue;
        };
        if workload_ref.namespace != namespace {
            continue;
        }
        let kinds = reference_kinds(workload, secret_name);
        if !kinds.is_empty() {
            matches.entry(workload_ref).or_default().extend(kinds);
        }
    }

    matches
        .into_iter()
        .map(|(workload, kinds)| WorkloadMatch { workload, kinds })
        .collect()
}

/// Whether a matched workload should actually be restarted
///
/// The restart-deployments annotation is read from the Deployment metadata,
/// then its pod template, then the updated secret. A value that does not parse
/// as a flag falls through to the next level; `default` applies when none
/// decides.
#[must_use]
pub fn restart_enabled(
    workload: &Deployment,
    secret_annotations: Option<&BTreeMap<String, String>>,
    default: bool,
) -> bool {
    workload_annotations(workload, RESTART_DEPLOYMENTS_ANNOTATION)
        .find_map(parse_bool_flag)
        .or_else(|| {
            secret_annotations
                .and_then(|a| a.get(RESTART_DEPLOYMENTS_ANNOTATION))
                .and_then(|v| parse_bool_flag(v))
        })
        .unwrap_or(default)
}
