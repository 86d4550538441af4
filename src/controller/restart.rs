//! # Restart Applicator
//!
//! Signals a rollout by writing a fresh restart-trigger value into a
//! workload's pod-template annotations. The Deployment controller sees the
//! template hash change and performs its own rolling update.
//!
//! A restart that cannot be written is remembered on the secret that caused it
//! ([`PendingRestarts`]), so the next cycle retries it even though the secret
//! itself is already up to date.

use crate::constants::{PENDING_RESTARTS_ANNOTATION, RESTART_ANNOTATION};
use crate::controller::store::WorkloadStore;
use crate::controller::types::{SyncError, WorkloadRef};
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::info;

/// Restarts still owed to the consumers of a secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRestarts {
    /// Every consumer (the consumers could not be resolved)
    All,
    /// The named Deployments in the secret's namespace
    Workloads(BTreeSet<String>),
}

impl PendingRestarts {
    /// Parse the pending-restarts annotation value; empty means nothing owed
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value == "*" {
            return Some(Self::All);
        }
        let names: BTreeSet<String> = value
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        (!names.is_empty()).then_some(Self::Workloads(names))
    }

    /// Pending restarts recorded in a secret's annotations
    #[must_use]
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Option<Self> {
        annotations
            .get(PENDING_RESTARTS_ANNOTATION)
            .and_then(|v| Self::parse(v))
    }

    /// Whether the Deployment named `workload` is owed a restart
    #[must_use]
    pub fn includes(&self, workload: &str) -> bool {
        match self {
            Self::All => true,
            Self::Workloads(names) => names.contains(workload),
        }
    }
}

impl fmt::Display for PendingRestarts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "*"),
            Self::Workloads(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                write!(f, "{}", names.join(","))
            }
        }
    }
}

/// Restart-trigger value for `now`
///
/// Nanosecond precision so that two restarts never write the same value.
#[must_use]
pub fn restart_trigger_value(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Pod-template annotations written by a restart
#[must_use]
pub fn restart_annotations(now: DateTime<Utc>) -> BTreeMap<String, String> {
    BTreeMap::from([(RESTART_ANNOTATION.to_string(), restart_trigger_value(now))])
}

/// Restart `workload` by patching its pod-template restart trigger
///
/// # Errors
/// Returns the classified store error when the patch fails
pub async fn restart(
    store: &dyn WorkloadStore,
    workload: &Deployment,
    now: DateTime<Utc>,
) -> Result<WorkloadRef, SyncError> {
    let workload_ref = WorkloadRef::of_workload(workload)
        .ok_or_else(|| SyncError::Unknown("workload has no name".to_string()))?;

    let annotations = restart_annotations(now);
    store
        .patch_pod_template_annotations(&workload_ref, &annotations)
        .await?;

    info!(
        workload = %workload_ref,
        restarted_at = %annotations[RESTART_ANNOTATION],
        "Restart triggered"
    );
    Ok(workload_ref)
}
