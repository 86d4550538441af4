//! # vsctl
//!
//! Operator CLI for the Vault Sync Controller.
//!
//! ```bash
//! # Managed secrets with their item path and synced version
//! vsctl list
//! vsctl list --namespace payments
//!
//! # Deployments that consume a secret, and how they reference it
//! vsctl consumers db-credentials --namespace payments
//!
//! # Run one sync cycle now and print the report (needs VAULT_TOKEN)
//! vsctl sync
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::Client;

mod consumers;
mod list;
mod sync;

/// Vault Sync Controller CLI
#[derive(Parser)]
#[command(name = "vsctl")]
#[command(
    about = "Vault Sync Controller CLI",
    long_about = None,
    after_help = "\
Examples:
  vsctl list
  vsctl consumers db-credentials --namespace payments
  vsctl sync --namespace payments
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace (all namespaces when omitted, `default` for consumers)
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List managed secrets
    List,
    /// Show the Deployments that consume a secret
    Consumers {
        /// Name of the secret
        #[arg(value_name = "SECRET")]
        name: String,
    },
    /// Run one sync cycle against the cluster and print the report
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    vault_sync_controller::runtime::initialization::install_crypto_provider()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vsctl=info,vault_sync_controller=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;

    match cli.command {
        Commands::List => list::list_command(client, cli.namespace).await,
        Commands::Consumers { name } => {
            consumers::consumers_command(client, name, cli.namespace).await
        }
        Commands::Sync => sync::sync_command(client, cli.namespace).await,
    }
}
