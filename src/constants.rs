//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Annotation keys are a stable contract with the workloads and secrets in the
//! cluster. The remaining values are defaults that can be overridden via
//! environment variables (see [`crate::config::ControllerConfig`]).

/// Annotation on a secret (or workload) naming the vault item it is sourced from,
/// in the form `vaults/<vaultId>/items/<itemId>`
pub const ITEM_PATH_ANNOTATION: &str = "vaultsync.octopilot.io/item-path";

/// Annotation on a workload naming the secret that backs its pods
pub const ITEM_NAME_ANNOTATION: &str = "vaultsync.octopilot.io/item-name";

/// Annotation on a managed secret holding the last synced item version
pub const VERSION_ANNOTATION: &str = "vaultsync.octopilot.io/version";

/// Pod-template annotation rewritten to force a rollout
pub const RESTART_ANNOTATION: &str = "vaultsync.octopilot.io/restarted-at";

/// Boolean annotation switching restart propagation on or off
pub const RESTART_DEPLOYMENTS_ANNOTATION: &str = "vaultsync.octopilot.io/restart-deployments";

/// Annotation on a managed secret listing consumers whose restart is still
/// owed (comma-separated Deployment names, or `*` for every consumer)
pub const PENDING_RESTARTS_ANNOTATION: &str = "vaultsync.octopilot.io/pending-restarts";

/// Field manager name used for patches
pub const FIELD_MANAGER: &str = "vault-sync-controller";

/// Default polling interval between sync cycles (seconds)
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 600;

/// Default namespace scope
pub const DEFAULT_WATCH_NAMESPACE: &str = "all";

/// Default vault API base URL
pub const DEFAULT_VAULT_HOST: &str = "http://localhost:8080";

/// Default restart propagation when neither workload nor secret decides
pub const DEFAULT_AUTO_RESTART: bool = true;

/// Default number of secrets synced concurrently within one cycle
pub const DEFAULT_MAX_CONCURRENT_SYNCS: usize = 10;

/// Default timeout for one vault request (seconds)
pub const DEFAULT_VAULT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP server port for metrics and health checks
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default log format (json, text)
pub const DEFAULT_LOG_FORMAT: &str = "text";
