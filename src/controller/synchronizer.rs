//! # Secret Synchronizer
//!
//! One sync cycle over every managed secret in scope.
//!
//! ## Cycle
//!
//! 1. List secrets and keep those carrying the item-path annotation
//! 2. Per secret, concurrently and in isolation:
//!    - parse the item path (malformed -> this secret fails)
//!    - fetch the vault item (not found -> skipped, other errors -> failed)
//!    - compare the item version with the version annotation (equal -> no-op)
//!    - rebuild data and version annotation and replace the secret
//! 3. For the secrets rewritten in step 2, resolve the consuming workloads
//!    per namespace and restart each of them once. Unchanged secrets that
//!    still owe restarts from an earlier cycle take part with just those
//!    workloads.
//! 4. Record on each secret the restarts that could not be written (or clear
//!    the record once they are), so a later cycle retries them
//!
//! Only a failure of the initial listing aborts the cycle. Everything else is
//! logged, counted and carried in the [`SyncReport`]; the next cycle retries.

use crate::constants::{ITEM_PATH_ANNOTATION, PENDING_RESTARTS_ANNOTATION, VERSION_ANNOTATION};
use crate::controller::store::{SecretStore, WorkloadStore};
use crate::controller::types::{
    CycleError, ObjectRef, SecretOutcome, SecretRef, SyncError, SyncReport, WorkloadRef,
};
use crate::controller::restart::PendingRestarts;
use crate::controller::{builder, resolver, restart};
use crate::observability::metrics;
use crate::vault::{FetchError, ItemFetcher, ItemPath};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Tunables for a sync cycle
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Restart propagation when neither workload nor secret decides
    pub auto_restart: bool,
    /// Secrets processed concurrently
    pub max_concurrent_syncs: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_restart: crate::constants::DEFAULT_AUTO_RESTART,
            max_concurrent_syncs: crate::constants::DEFAULT_MAX_CONCURRENT_SYNCS,
        }
    }
}

/// Result of one secret's sync unit
#[derive(Debug)]
struct SecretResult {
    secret: SecretRef,
    annotations: BTreeMap<String, String>,
    outcome: SecretOutcome,
    /// Latest copy of the object (the stored one after a rewrite)
    latest: Option<Secret>,
}

/// A secret whose consumers are due a restart this cycle
#[derive(Debug)]
struct RestartCandidate {
    secret: Secret,
    /// Annotations as listed, for the restart policy
    annotations: BTreeMap<String, String>,
    due: PendingRestarts,
    /// Pending restarts currently recorded on `secret`
    recorded: Option<PendingRestarts>,
}

/// A secret counts as managed when it carries the item-path annotation
#[must_use]
pub fn is_managed(secret: &Secret) -> bool {
    secret
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(ITEM_PATH_ANNOTATION))
}

/// Drives sync cycles against a vault and a cluster
///
/// Holds no state between cycles apart from the shutdown flag.
pub struct SecretSynchronizer {
    fetcher: Arc<dyn ItemFetcher>,
    secrets: Arc<dyn SecretStore>,
    workloads: Arc<dyn WorkloadStore>,
    settings: SyncSettings,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for SecretSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretSynchronizer")
            .field("settings", &self.settings)
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SecretSynchronizer {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn ItemFetcher>,
        secrets: Arc<dyn SecretStore>,
        workloads: Arc<dyn WorkloadStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            fetcher,
            secrets,
            workloads,
            settings,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops new per-secret work from starting once set
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run one sync cycle
    ///
    /// # Errors
    /// Returns [`CycleError`] only when the secrets that seed the cycle cannot
    /// be listed. Per-secret and per-workload failures are in the report.
    pub async fn synchronize(&self, now: DateTime<Utc>) -> Result<SyncReport, CycleError> {
        let start = Instant::now();
        metrics::increment_sync_cycles();

        let secrets = self.secrets.list_secrets().await.map_err(|e| {
            metrics::increment_sync_cycle_errors();
            CycleError::ListSecrets(e)
        })?;

        let managed: Vec<Secret> = secrets.into_iter().filter(is_managed).collect();
        metrics::set_secrets_managed(i64::try_from(managed.len()).unwrap_or(i64::MAX));
        debug!("Found {} managed secret(s)", managed.len());

        let mut report = SyncReport {
            examined: managed.len(),
            ..SyncReport::default()
        };

        let results: Vec<SecretResult> = stream::iter(managed)
            .map(|secret| self.sync_secret(secret))
            .buffer_unordered(self.settings.max_concurrent_syncs.max(1))
            .collect()
            .await;

        let mut candidates: BTreeMap<SecretRef, RestartCandidate> = BTreeMap::new();
        for result in results {
            match result.outcome {
                SecretOutcome::Updated { .. } => {
                    report.updated.insert(result.secret.clone());
                    if let Some(secret) = result.latest {
                        candidates.insert(
                            result.secret,
                            RestartCandidate {
                                secret,
                                annotations: result.annotations,
                                due: PendingRestarts::All,
                                recorded: None,
                            },
                        );
                    }
                }
                SecretOutcome::Unchanged => {
                    report.unchanged += 1;
                    let pending = PendingRestarts::from_annotations(&result.annotations);
                    if let (Some(due), Some(secret)) = (pending, result.latest) {
                        debug!("Secret {} still owes restarts: {}", result.secret, due);
                        candidates.insert(
                            result.secret,
                            RestartCandidate {
                                secret,
                                annotations: result.annotations,
                                recorded: Some(due.clone()),
                                due,
                            },
                        );
                    }
                }
                SecretOutcome::Skipped { .. } | SecretOutcome::Cancelled => report.skipped += 1,
                SecretOutcome::Failed(e) => {
                    metrics::increment_sync_errors(e.reason());
                    report.failed.push((result.secret, e));
                }
            }
        }
        metrics::increment_secrets_updated(report.updated.len() as u64);

        if !candidates.is_empty() {
            let owed = self.propagate_restarts(&candidates, now, &mut report).await;
            self.record_pending_restarts(candidates, owed).await;
        }

        metrics::observe_sync_cycle_duration(start.elapsed().as_secs_f64());
        info!("Sync cycle finished: {}", report);
        Ok(report)
    }

    async fn sync_secret(&self, secret: Secret) -> SecretResult {
        let secret_ref = ObjectRef::of_secret(&secret)
            .unwrap_or_else(|| ObjectRef::new("default", "<unnamed>"));
        let annotations = secret.metadata.annotations.clone().unwrap_or_default();

        if self.shutdown.load(Ordering::Relaxed) {
            debug!(secret = %secret_ref, "Shutdown requested, not starting sync");
            return SecretResult {
                secret: secret_ref,
                annotations,
                outcome: SecretOutcome::Cancelled,
                latest: None,
            };
        }

        let span = info_span!(
            "vaultsync.secret.sync",
            secret.name = %secret_ref.name,
            secret.namespace = %secret_ref.namespace,
            item.path = annotations.get(ITEM_PATH_ANNOTATION).map_or("", String::as_str)
        );
        let (outcome, latest) = match self.try_sync_secret(secret).instrument(span.clone()).await
        {
            Ok((outcome, latest)) => (outcome, Some(latest)),
            Err(e) => (SecretOutcome::Failed(e), None),
        };

        span.in_scope(|| match &outcome {
            SecretOutcome::Updated { version } => {
                info!("Secret {} updated to item version {}", secret_ref, version);
            }
            SecretOutcome::Unchanged => debug!("Secret {} is up to date", secret_ref),
            SecretOutcome::Skipped { reason } => {
                warn!("Secret {} left unchanged: {}", secret_ref, reason);
            }
            SecretOutcome::Cancelled => {}
            SecretOutcome::Failed(e) => {
                error!(reason = e.reason(), "Failed to sync secret {}: {}", secret_ref, e);
            }
        });

        SecretResult {
            secret: secret_ref,
            annotations,
            outcome,
            latest,
        }
    }

    /// Returns the outcome with the latest copy of the secret
    async fn try_sync_secret(
        &self,
        mut secret: Secret,
    ) -> Result<(SecretOutcome, Secret), SyncError> {
        let annotations = secret.metadata.annotations.clone().unwrap_or_default();
        let raw_path = annotations
            .get(ITEM_PATH_ANNOTATION)
            .map_or("", String::as_str);
        let path = ItemPath::parse(raw_path)?;

        let item = match self.fetcher.fetch(&path).await {
            Ok(item) => item,
            Err(e @ FetchError::NotFound { .. }) => {
                let outcome = SecretOutcome::Skipped {
                    reason: e.to_string(),
                };
                return Ok((outcome, secret));
            }
            Err(e) => return Err(e.into()),
        };

        let version = item.version.to_string();
        if annotations.get(VERSION_ANNOTATION) == Some(&version) {
            return Ok((SecretOutcome::Unchanged, secret));
        }

        debug!(
            "Item version {} differs from stored version {:?}",
            version,
            annotations.get(VERSION_ANNOTATION)
        );
        let payload = builder::build(&item, &path);
        builder::apply_payload(&mut secret, &payload);
        // Every consumer is restarted after a rewrite, older debts included
        if let Some(annotations) = secret.metadata.annotations.as_mut() {
            annotations.remove(PENDING_RESTARTS_ANNOTATION);
        }
        let stored = self.secrets.replace_secret(&secret).await?;

        Ok((SecretOutcome::Updated { version }, stored))
    }

    /// Restart every workload due by a candidate secret, once per workload
    ///
    /// Returns the restarts still owed per secret.
    async fn propagate_restarts(
        &self,
        candidates: &BTreeMap<SecretRef, RestartCandidate>,
        now: DateTime<Utc>,
        report: &mut SyncReport,
    ) -> BTreeMap<SecretRef, PendingRestarts> {
        let namespaces: BTreeSet<&str> = candidates
            .keys()
            .map(|s| s.namespace.as_str())
            .collect();

        let mut owed: BTreeMap<SecretRef, PendingRestarts> = BTreeMap::new();
        let mut planned: BTreeMap<WorkloadRef, (Deployment, BTreeSet<SecretRef>)> =
            BTreeMap::new();
        for namespace in namespaces {
            let span = info_span!("vaultsync.restart.resolve", namespace = %namespace);
            let workloads = match self
                .workloads
                .list_workloads(namespace)
                .instrument(span)
                .await
            {
                Ok(workloads) => workloads,
                Err(e) => {
                    error!(
                        "Failed to list workloads in namespace {}, restarts deferred: {}",
                        namespace, e
                    );
                    metrics::increment_restart_errors("list");
                    for (secret, candidate) in
                        candidates.iter().filter(|(s, _)| s.namespace == namespace)
                    {
                        owed.insert(secret.clone(), candidate.due.clone());
                    }
                    continue;
                }
            };

            for (secret, candidate) in candidates.iter().filter(|(s, _)| s.namespace == namespace)
            {
                for matched in resolver::resolve(&secret.name, namespace, &workloads) {
                    if !candidate.due.includes(&matched.workload.name) {
                        continue;
                    }
                    let kinds: Vec<&str> =
                        matched.kinds.iter().map(resolver::ReferenceKind::as_str).collect();
                    let Some(workload) = workloads
                        .iter()
                        .find(|w| WorkloadRef::of_workload(w).as_ref() == Some(&matched.workload))
                    else {
                        continue;
                    };

                    if !resolver::restart_enabled(
                        workload,
                        Some(&candidate.annotations),
                        self.settings.auto_restart,
                    ) {
                        info!(
                            "Workload {} references secret {} ({}) but restarts are disabled",
                            matched.workload,
                            secret,
                            kinds.join(",")
                        );
                        continue;
                    }

                    debug!(
                        "Workload {} references secret {} via {}",
                        matched.workload,
                        secret,
                        kinds.join(",")
                    );
                    planned
                        .entry(matched.workload)
                        .or_insert_with(|| (workload.clone(), BTreeSet::new()))
                        .1
                        .insert(secret.clone());
                }
            }
        }

        let workload_store = self.workloads.as_ref();
        let results = futures::future::join_all(planned.into_iter().map(
            |(workload_ref, (workload, secrets))| async move {
                let span = info_span!(
                    "vaultsync.restart.apply",
                    workload = %workload_ref,
                    secrets = ?secrets
                );
                let result = restart::restart(workload_store, &workload, now)
                    .instrument(span)
                    .await;
                (workload_ref, secrets, result)
            },
        ))
        .await;

        for (workload_ref, secrets, result) in results {
            match result {
                Ok(_) => {
                    metrics::increment_restarts();
                    report.restarted.insert(workload_ref);
                }
                Err(e) => {
                    error!("Failed to restart workload {}: {}", workload_ref, e);
                    metrics::increment_restart_errors(e.reason());
                    for secret in secrets {
                        owe_restart(&mut owed, secret, &workload_ref.name);
                    }
                    report.restart_failures.push((workload_ref, e));
                }
            }
        }
        owed
    }

    /// Write the restarts still owed onto each candidate secret
    ///
    /// Secrets whose record already matches are not written.
    async fn record_pending_restarts(
        &self,
        candidates: BTreeMap<SecretRef, RestartCandidate>,
        mut owed: BTreeMap<SecretRef, PendingRestarts>,
    ) {
        for (secret_ref, candidate) in candidates {
            let pending = owed.remove(&secret_ref);
            if pending == candidate.recorded {
                continue;
            }

            let mut secret = candidate.secret;
            let annotations = secret.metadata.annotations.get_or_insert_with(BTreeMap::new);
            match &pending {
                Some(p) => {
                    annotations.insert(PENDING_RESTARTS_ANNOTATION.to_string(), p.to_string());
                }
                None => {
                    annotations.remove(PENDING_RESTARTS_ANNOTATION);
                }
            }

            match self.secrets.replace_secret(&secret).await {
                Ok(_) => match pending {
                    Some(p) => warn!(
                        "Secret {} owes restarts to {}, retrying next cycle",
                        secret_ref, p
                    ),
                    None => debug!("Secret {} owes no more restarts", secret_ref),
                },
                Err(e) => {
                    error!(
                        "Failed to record pending restarts on secret {}: {}",
                        secret_ref, e
                    );
                    metrics::increment_restart_errors("pending");
                }
            }
        }
    }
}

/// Add `workload` to the restarts owed by `secret`
fn owe_restart(owed: &mut BTreeMap<SecretRef, PendingRestarts>, secret: SecretRef, workload: &str) {
    match owed
        .entry(secret)
        .or_insert_with(|| PendingRestarts::Workloads(BTreeSet::new()))
    {
        PendingRestarts::All => {}
        PendingRestarts::Workloads(names) => {
            names.insert(workload.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn secret_with(annotations: Option<BTreeMap<String, String>>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("s".to_string()),
                annotations,
                ..ObjectMeta::default()
            },
            ..Secret::default()
        }
    }

    #[test]
    fn test_is_managed_requires_item_path() {
        assert!(!is_managed(&secret_with(None)));
        assert!(!is_managed(&secret_with(Some(BTreeMap::from([(
            VERSION_ANNOTATION.to_string(),
            "3".to_string()
        )])))));
        assert!(is_managed(&secret_with(Some(BTreeMap::from([(
            ITEM_PATH_ANNOTATION.to_string(),
            "vaults/v/items/i".to_string()
        )])))));
    }

    #[test]
    fn test_owe_restart_accumulates_names() {
        let secret = ObjectRef::new("default", "db");
        let mut owed = BTreeMap::new();
        owe_restart(&mut owed, secret.clone(), "web");
        owe_restart(&mut owed, secret.clone(), "api");
        assert_eq!(owed[&secret].to_string(), "api,web");

        owed.insert(secret.clone(), PendingRestarts::All);
        owe_restart(&mut owed, secret.clone(), "worker");
        assert_eq!(owed[&secret], PendingRestarts::All);
    }

    #[test]
    fn test_default_settings() {
        let settings = SyncSettings::default();
        assert!(settings.auto_restart);
        assert_eq!(settings.max_concurrent_syncs, 10);
    }
}
