//! # Consumers Command
//!
//! Shows which Deployments reference a secret, by which mechanisms, and
//! whether an update of the secret would restart them.

use anyhow::{Context, Result};
use kube::Client;
use vault_sync_controller::config::{ControllerConfig, NamespaceScope};
use vault_sync_controller::controller::resolver::{resolve, restart_enabled};
use vault_sync_controller::controller::{KubeStore, SecretStore, WorkloadRef, WorkloadStore};

pub async fn consumers_command(
    client: Client,
    name: String,
    namespace: Option<String>,
) -> Result<()> {
    let namespace = namespace.unwrap_or_else(|| "default".to_string());
    let config = ControllerConfig::from_env();
    let store = KubeStore::new(client, NamespaceScope::Namespaces(vec![namespace.clone()]));

    let secret_annotations = store
        .list_secrets()
        .await
        .context("Failed to list secrets")?
        .into_iter()
        .find(|s| s.metadata.name.as_deref() == Some(name.as_str()))
        .and_then(|s| s.metadata.annotations);
    if secret_annotations.is_none() {
        println!("Note: secret {namespace}/{name} does not exist (yet).");
    }

    let workloads = store
        .list_workloads(&namespace)
        .await
        .with_context(|| format!("Failed to list deployments in namespace {namespace}"))?;
    let matches = resolve(&name, &namespace, &workloads);

    if matches.is_empty() {
        println!("No Deployments in {namespace} reference secret {name}.");
        return Ok(());
    }

    println!(
        "\n{:<30} {:<35} {:<10}",
        "DEPLOYMENT", "REFERENCED BY", "RESTART"
    );
    println!("{}", "-".repeat(77));

    for matched in matches {
        let restart = workloads
            .iter()
            .find(|w| WorkloadRef::of_workload(w).as_ref() == Some(&matched.workload))
            .is_some_and(|w| {
                restart_enabled(w, secret_annotations.as_ref(), config.auto_restart)
            });
        let kinds = matched
            .kinds
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let restart = if restart { "Yes" } else { "No" };

        println!("{:<30} {kinds:<35} {restart:<10}", matched.workload.name);
    }

    Ok(())
}
