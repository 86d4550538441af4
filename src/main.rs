//! # Vault Sync Controller
//!
//! Keeps vault-derived Kubernetes secrets in step with their vault items and
//! rolls the Deployments that consume a secret whenever it is rewritten.
//!
//! A secret is managed when it carries `vaultsync.octopilot.io/item-path`.
//! Every polling interval the controller compares the item's version with the
//! secret's `vaultsync.octopilot.io/version` annotation, rewrites stale secrets,
//! and stamps a restart trigger on each consuming Deployment. SIGHUP runs a
//! cycle right away.

use anyhow::Result;
use tracing::info;
use vault_sync_controller::runtime::{
    forward_hangups, initialize, run_poll_loop, shutdown_signal,
};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    tokio::spawn(forward_hangups(init.trigger.clone()));

    run_poll_loop(
        init.synchronizer,
        init.config.polling_interval(),
        init.trigger,
        init.server_state,
        shutdown_signal(),
    )
    .await;

    info!("Controller stopped");
    Ok(())
}
