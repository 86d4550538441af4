//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_AUTO_RESTART, DEFAULT_LOG_FORMAT, DEFAULT_MAX_CONCURRENT_SYNCS, DEFAULT_METRICS_PORT,
    DEFAULT_POLLING_INTERVAL_SECS, DEFAULT_VAULT_HOST, DEFAULT_VAULT_TIMEOUT_SECS,
    DEFAULT_WATCH_NAMESPACE,
};
use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

/// Set of namespaces the controller operates on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceScope {
    /// Every namespace in the cluster
    All,
    /// An explicit list of namespaces
    Namespaces(Vec<String>),
}

impl NamespaceScope {
    /// Parse a comma-separated namespace list, or `all`
    ///
    /// Blank entries are ignored. An empty list falls back to `All`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return Self::All;
        }

        let mut namespaces: Vec<String> = trimmed
            .split(',')
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(ToString::to_string)
            .collect();
        namespaces.sort();
        namespaces.dedup();

        if namespaces.is_empty() {
            Self::All
        } else {
            Self::Namespaces(namespaces)
        }
    }
}

impl fmt::Display for NamespaceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Namespaces(namespaces) => write!(f, "{}", namespaces.join(",")),
        }
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Clone)]
pub struct ControllerConfig {
    /// Seconds between two sync cycles
    pub polling_interval_secs: u64,
    /// Namespaces whose secrets and workloads are synchronized
    pub namespace_scope: NamespaceScope,
    /// Vault API base URL
    pub vault_host: String,
    /// Bearer token for the vault API
    pub vault_token: Option<Zeroizing<String>>,
    /// Seconds one vault request may take before it counts as unavailable
    pub vault_timeout_secs: u64,
    /// Restart propagation used when neither the workload nor the secret
    /// carries the restart-deployments annotation
    pub auto_restart: bool,
    /// Maximum secrets processed concurrently within a cycle
    pub max_concurrent_syncs: usize,
    /// Metrics and health server port
    pub metrics_port: u16,
    /// Log format (json, text)
    pub log_format: String,
}

impl fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("polling_interval_secs", &self.polling_interval_secs)
            .field("namespace_scope", &self.namespace_scope)
            .field("vault_host", &self.vault_host)
            .field("vault_token", &self.vault_token.as_ref().map(|_| "***"))
            .field("vault_timeout_secs", &self.vault_timeout_secs)
            .field("auto_restart", &self.auto_restart)
            .field("max_concurrent_syncs", &self.max_concurrent_syncs)
            .field("metrics_port", &self.metrics_port)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            polling_interval_secs: DEFAULT_POLLING_INTERVAL_SECS,
            namespace_scope: NamespaceScope::All,
            vault_host: DEFAULT_VAULT_HOST.to_string(),
            vault_token: None,
            vault_timeout_secs: DEFAULT_VAULT_TIMEOUT_SECS,
            auto_restart: DEFAULT_AUTO_RESTART,
            max_concurrent_syncs: DEFAULT_MAX_CONCURRENT_SYNCS,
            metrics_port: DEFAULT_METRICS_PORT,
            log_format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            polling_interval_secs: env_var_or_default(
                "POLLING_INTERVAL",
                DEFAULT_POLLING_INTERVAL_SECS,
            ),
            namespace_scope: NamespaceScope::parse(&env_var_or_default_str(
                "WATCH_NAMESPACE",
                DEFAULT_WATCH_NAMESPACE,
            )),
            vault_host: env_var_or_default_str("VAULT_HOST", DEFAULT_VAULT_HOST),
            vault_token: std::env::var("VAULT_TOKEN")
                .ok()
                .filter(|token| !token.is_empty())
                .map(Zeroizing::new),
            vault_timeout_secs: env_var_or_default("VAULT_TIMEOUT", DEFAULT_VAULT_TIMEOUT_SECS),
            auto_restart: env_var_or_default_bool("AUTO_RESTART", DEFAULT_AUTO_RESTART),
            max_concurrent_syncs: env_var_or_default(
                "MAX_CONCURRENT_SYNCS",
                DEFAULT_MAX_CONCURRENT_SYNCS,
            )
            .max(1),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            log_format: env_var_or_default_str("LOG_FORMAT", DEFAULT_LOG_FORMAT),
        }
    }

    /// Get polling interval duration
    ///
    /// A zero interval would spin the poll loop, so it is clamped to one second.
    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs.max(1))
    }

    /// Get the per-request vault timeout, at least one second
    #[must_use]
    pub fn vault_timeout(&self) -> Duration {
        Duration::from_secs(self.vault_timeout_secs.max(1))
    }
}

/// Parse a boolean flag leniently (`true/1/yes/on`, `false/0/no/off`)
///
/// Returns `None` for anything else so callers can fall back to a default.
#[must_use]
pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool_flag(&v))
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
