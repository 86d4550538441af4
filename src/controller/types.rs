//! # Types
//!
//! Core types shared by the synchronizer, resolver and applicator.

use crate::vault::{FetchError, ItemPathError};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Namespaced identity of a cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

/// A managed secret, identified by namespace and name
pub type SecretRef = ObjectRef;

/// A workload (Deployment), identified by namespace and name
pub type WorkloadRef = ObjectRef;

impl ObjectRef {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a secret object, if it has a name
    #[must_use]
    pub fn of_secret(secret: &Secret) -> Option<Self> {
        Some(Self::new(
            secret.metadata.namespace.as_deref().unwrap_or("default"),
            secret.metadata.name.as_deref()?,
        ))
    }

    /// Identity of a deployment object, if it has a name
    #[must_use]
    pub fn of_workload(workload: &Deployment) -> Option<Self> {
        Some(Self::new(
            workload.metadata.namespace.as_deref().unwrap_or("default"),
            workload.metadata.name.as_deref()?,
        ))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Errors from the cluster secret and workload stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic-concurrency collision: the object changed since it was read
    #[error("write conflict on {resource}: {message}")]
    Conflict { resource: String, message: String },
    /// The object does not exist (any more)
    #[error("{resource} not found")]
    NotFound { resource: String },
    /// Any other API failure
    #[error("kubernetes API call for {resource} failed: {message}")]
    Api { resource: String, message: String },
}

impl StoreError {
    /// Classify a kube client error for `resource`
    #[must_use]
    pub fn from_kube(resource: impl Into<String>, error: &kube::Error) -> Self {
        let resource = resource.into();
        match error {
            kube::Error::Api(response) if response.code == 409 => StoreError::Conflict {
                resource,
                message: response.message.clone(),
            },
            kube::Error::Api(response) if response.code == 404 => {
                StoreError::NotFound { resource }
            }
            other => StoreError::Api {
                resource,
                message: other.to_string(),
            },
        }
    }
}

/// Failure of one secret's sync unit
///
/// These never abort a cycle; they are logged, counted and reported.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The item-path annotation could not be parsed
    #[error(transparent)]
    Parse(#[from] ItemPathError),
    /// The vault item could not be fetched
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The secret or workload changed between read and write
    #[error("{0}")]
    Conflict(String),
    /// Anything unclassified
    #[error("{0}")]
    Unknown(String),
}

impl From<StoreError> for SyncError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict { .. } => SyncError::Conflict(error.to_string()),
            StoreError::NotFound { .. } | StoreError::Api { .. } => {
                SyncError::Unknown(error.to_string())
            }
        }
    }
}

impl SyncError {
    /// Short reason label used for metrics and logs
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            SyncError::Parse(_) => "parse",
            SyncError::Fetch(e) => e.reason(),
            SyncError::Conflict(_) => "conflict",
            SyncError::Unknown(_) => "unknown",
        }
    }
}

/// Failure that prevents a cycle from running at all
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to list secrets: {0}")]
    ListSecrets(#[source] StoreError),
}

/// Outcome of one secret's sync unit
#[derive(Debug)]
pub enum SecretOutcome {
    /// Secret rewritten to the given version
    Updated { version: String },
    /// Stored version already matches the vault
    Unchanged,
    /// Left untouched on purpose (vault item gone)
    Skipped { reason: String },
    /// Not started because shutdown was requested
    Cancelled,
    /// Failed; retried on the next cycle
    Failed(SyncError),
}

/// Summary of one sync cycle
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Managed secrets examined
    pub examined: usize,
    /// Secrets rewritten this cycle
    pub updated: BTreeSet<SecretRef>,
    /// Secrets already at the vault version
    pub unchanged: usize,
    /// Secrets left alone (item not found) or not started (shutdown)
    pub skipped: usize,
    /// Secrets whose sync failed, with the failure
    pub failed: Vec<(SecretRef, SyncError)>,
    /// Workloads whose restart trigger was written
    pub restarted: BTreeSet<WorkloadRef>,
    /// Workloads whose restart failed, with the failure
    pub restart_failures: Vec<(WorkloadRef, SyncError)>,
}

impl SyncReport {
    /// Whether the cycle wrote anything to the cluster
    #[must_use]
    pub fn wrote_anything(&self) -> bool {
        !self.updated.is_empty() || !self.restarted.is_empty()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "examined={} updated={} unchanged={} skipped={} failed={} restarted={} restart_failures={}",
            self.examined,
            self.updated.len(),
            self.unchanged,
            self.skipped,
            self.failed.len(),
            self.restarted.len(),
            self.restart_failures.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflict_maps_to_sync_conflict() {
        let err: SyncError = StoreError::Conflict {
            resource: "secret default/s".to_string(),
            message: "the object has been modified".to_string(),
        }
        .into();
        assert_eq!(err.reason(), "conflict");
        assert!(err.to_string().contains("default/s"));
    }

    #[test]
    fn test_store_api_error_maps_to_unknown() {
        let err: SyncError = StoreError::Api {
            resource: "deployment default/web".to_string(),
            message: "connection reset".to_string(),
        }
        .into();
        assert_eq!(err.reason(), "unknown");
    }

    #[test]
    fn test_report_display() {
        let mut report = SyncReport {
            examined: 3,
            unchanged: 2,
            ..SyncReport::default()
        };
        report.updated.insert(ObjectRef::new("default", "s"));
        assert!(report.wrote_anything());
        assert_eq!(
            report.to_string(),
            "examined=3 updated=1 unchanged=2 skipped=0 failed=0 restarted=0 restart_failures=0"
        );
    }
}
