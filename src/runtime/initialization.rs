//! # Initialization
//!
//! Controller startup: rustls provider, logging, metrics, health server, the
//! vault client, the Kubernetes client and the synchronizer built on them.

use crate::config::ControllerConfig;
use crate::controller::{KubeStore, SecretStore, SecretSynchronizer, SyncSettings};
use crate::observability::{logging, metrics};
use crate::runtime::poll_loop::SyncTrigger;
use crate::server::{start_server, ServerState};
use crate::vault::ConnectClient;
use anyhow::{anyhow, Context, Result};
use kube::Client;
use std::sync::Arc;
use tracing::{error, info};

/// Everything the poll loop needs
pub struct InitializationResult {
    pub config: ControllerConfig,
    pub synchronizer: Arc<SecretSynchronizer>,
    pub server_state: Arc<ServerState>,
    pub trigger: SyncTrigger,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .field("server_ready", &self.server_state.ready())
            .finish_non_exhaustive()
    }
}

/// Install the ring crypto provider for rustls
///
/// Must run before any TLS client is built.
///
/// # Errors
/// Fails if another provider was installed first
pub fn install_crypto_provider() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))
}

/// Initialize the controller runtime
///
/// # Errors
/// Fails when `VAULT_TOKEN` is missing, a client cannot be built, or logging
/// and metrics were already initialized
pub async fn initialize() -> Result<InitializationResult> {
    install_crypto_provider()?;

    let config = ControllerConfig::from_env();
    logging::init_tracing(logging::LogFormat::parse(&config.log_format))?;

    info!("Starting Vault Sync Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!("Configuration: {:?}", config);

    metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_port = config.metrics_port;
    tokio::spawn({
        let server_state = Arc::clone(&server_state);
        async move {
            if let Err(e) = start_server(server_port, server_state).await {
                error!("HTTP server error: {}", e);
            }
        }
    });

    let token = config
        .vault_token
        .clone()
        .context("VAULT_TOKEN must be set to a non-empty bearer token")?;
    let fetcher = ConnectClient::new(&config.vault_host, token, config.vault_timeout())
        .context("Failed to build vault client")?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let store = Arc::new(KubeStore::new(client, config.namespace_scope.clone()));
    info!("Watching namespaces: {}", config.namespace_scope);

    let synchronizer = Arc::new(SecretSynchronizer::new(
        Arc::new(fetcher),
        Arc::clone(&store) as Arc<dyn SecretStore>,
        store,
        SyncSettings {
            auto_restart: config.auto_restart,
            max_concurrent_syncs: config.max_concurrent_syncs,
        },
    ));

    Ok(InitializationResult {
        config,
        synchronizer,
        server_state,
        trigger: SyncTrigger::new(),
    })
}
