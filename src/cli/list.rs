//! # List Command
//!
//! Lists managed secrets with their item path, last synced version and any
//! restarts still owed to their consumers.

use anyhow::{Context, Result};
use kube::Client;
use vault_sync_controller::config::NamespaceScope;
use vault_sync_controller::constants::{
    ITEM_PATH_ANNOTATION, PENDING_RESTARTS_ANNOTATION, VERSION_ANNOTATION,
};
use vault_sync_controller::controller::{is_managed, KubeStore, SecretStore};

pub async fn list_command(client: Client, namespace: Option<String>) -> Result<()> {
    let scope = namespace
        .as_deref()
        .map_or(NamespaceScope::All, NamespaceScope::parse);
    println!("Listing managed secrets (namespaces: {scope})...");

    let store = KubeStore::new(client, scope);
    let mut secrets: Vec<_> = store
        .list_secrets()
        .await
        .context("Failed to list secrets")?
        .into_iter()
        .filter(is_managed)
        .collect();

    if secrets.is_empty() {
        println!("No managed secrets found.");
        return Ok(());
    }

    secrets.sort_by(|a, b| {
        (&a.metadata.namespace, &a.metadata.name).cmp(&(&b.metadata.namespace, &b.metadata.name))
    });

    println!(
        "\n{:<30} {:<20} {:<45} {:<10} {:<20}",
        "NAME", "NAMESPACE", "ITEM PATH", "VERSION", "PENDING RESTARTS"
    );
    println!("{}", "-".repeat(129));

    for secret in secrets {
        let name = secret.metadata.name.as_deref().unwrap_or("<unknown>");
        let ns = secret.metadata.namespace.as_deref().unwrap_or("<unknown>");
        let annotations = secret.metadata.annotations.unwrap_or_default();
        let path = annotations
            .get(ITEM_PATH_ANNOTATION)
            .map_or("-", String::as_str);
        let version = annotations
            .get(VERSION_ANNOTATION)
            .map_or("-", String::as_str);
        let pending = annotations
            .get(PENDING_RESTARTS_ANNOTATION)
            .map_or("-", String::as_str);

        println!("{name:<30} {ns:<20} {path:<45} {version:<10} {pending:<20}");
    }

    Ok(())
}
