//! # Sync Command
//!
//! Runs one sync cycle with the controller's configuration and prints what
//! changed.

use anyhow::{Context, Result};
use chrono::Utc;
use kube::Client;
use std::sync::Arc;
use vault_sync_controller::config::{ControllerConfig, NamespaceScope};
use vault_sync_controller::controller::{
    KubeStore, SecretStore, SecretSynchronizer, SyncSettings,
};
use vault_sync_controller::vault::ConnectClient;

pub async fn sync_command(client: Client, namespace: Option<String>) -> Result<()> {
    let config = ControllerConfig::from_env();
    let scope = namespace
        .as_deref()
        .map_or_else(|| config.namespace_scope.clone(), NamespaceScope::parse);

    let token = config
        .vault_token
        .clone()
        .context("VAULT_TOKEN must be set to run a sync")?;
    let fetcher = ConnectClient::new(&config.vault_host, token, config.vault_timeout())?;
    let store = Arc::new(KubeStore::new(client, scope.clone()));

    let synchronizer = SecretSynchronizer::new(
        Arc::new(fetcher),
        Arc::clone(&store) as Arc<dyn SecretStore>,
        store,
        SyncSettings {
            auto_restart: config.auto_restart,
            max_concurrent_syncs: config.max_concurrent_syncs,
        },
    );

    println!("Running sync cycle (namespaces: {scope}) against {}...", config.vault_host);
    let report = synchronizer
        .synchronize(Utc::now())
        .await
        .context("Sync cycle failed")?;

    println!("\n{report}");
    for secret in &report.updated {
        println!("  updated    {secret}");
    }
    for (secret, error) in &report.failed {
        println!("  failed     {secret}: {error}");
    }
    for workload in &report.restarted {
        println!("  restarted  {workload}");
    }
    for (workload, error) in &report.restart_failures {
        println!("  not restarted {workload}: {error}");
    }

    Ok(())
}
