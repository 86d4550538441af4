//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `vault_sync_cycles_total` - Sync cycles started
//! - `vault_sync_cycle_errors_total` - Sync cycles aborted before any secret was examined
//! - `vault_sync_cycle_duration_seconds` - Duration of a full sync cycle
//! - `vault_sync_secrets_managed` - Managed secrets seen by the last cycle
//! - `vault_sync_secrets_updated_total` - Secrets rewritten from the vault
//! - `vault_sync_secret_errors_total{reason}` - Per-secret sync failures
//! - `vault_sync_restarts_total` - Workload restarts triggered
//! - `vault_sync_restart_errors_total{reason}` - Workload restart failures
//! - `vault_sync_vault_fetch_duration_seconds` - Duration of vault item fetches
//! - `vault_sync_vault_fetch_errors_total{reason}` - Vault item fetch failures

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static SYNC_CYCLES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("vault_sync_cycles_total", "Total number of sync cycles started")
        .expect("Failed to create SYNC_CYCLES_TOTAL metric - this should never happen")
});

static SYNC_CYCLE_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_sync_cycle_errors_total",
        "Total number of sync cycles that could not list secrets",
    )
    .expect("Failed to create SYNC_CYCLE_ERRORS_TOTAL metric - this should never happen")
});

static SYNC_CYCLE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "vault_sync_cycle_duration_seconds",
            "Duration of a sync cycle in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create SYNC_CYCLE_DURATION metric - this should never happen")
});

static SECRETS_MANAGED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "vault_sync_secrets_managed",
        "Number of managed secrets seen by the last sync cycle",
    )
    .expect("Failed to create SECRETS_MANAGED metric - this should never happen")
});

static SECRETS_UPDATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_sync_secrets_updated_total",
        "Total number of secrets rewritten from the vault",
    )
    .expect("Failed to create SECRETS_UPDATED_TOTAL metric - this should never happen")
});

static SECRET_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_sync_secret_errors_total",
            "Total number of per-secret sync failures by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create SECRET_ERRORS_TOTAL metric - this should never happen")
});

static RESTARTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_sync_restarts_total",
        "Total number of workload restarts triggered",
    )
    .expect("Failed to create RESTARTS_TOTAL metric - this should never happen")
});

static RESTART_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_sync_restart_errors_total",
            "Total number of workload restart failures by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create RESTART_ERRORS_TOTAL metric - this should never happen")
});

static VAULT_FETCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "vault_sync_vault_fetch_duration_seconds",
            "Duration of vault item fetches in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("Failed to create VAULT_FETCH_DURATION metric - this should never happen")
});

static VAULT_FETCH_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_sync_vault_fetch_errors_total",
            "Total number of vault item fetch failures by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create VAULT_FETCH_ERRORS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Fails only when a metric is registered twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(SYNC_CYCLES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_CYCLE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_CYCLE_DURATION.clone()))?;
    REGISTRY.register(Box::new(SECRETS_MANAGED.clone()))?;
    REGISTRY.register(Box::new(SECRETS_UPDATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRET_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESTARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESTART_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VAULT_FETCH_DURATION.clone()))?;
    REGISTRY.register(Box::new(VAULT_FETCH_ERRORS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_sync_cycles() {
    SYNC_CYCLES_TOTAL.inc();
}

pub fn increment_sync_cycle_errors() {
    SYNC_CYCLE_ERRORS_TOTAL.inc();
}

pub fn observe_sync_cycle_duration(duration: f64) {
    SYNC_CYCLE_DURATION.observe(duration);
}

pub fn set_secrets_managed(count: i64) {
    SECRETS_MANAGED.set(count);
}

pub fn increment_secrets_updated(count: u64) {
    SECRETS_UPDATED_TOTAL.inc_by(count);
}

/// Count a per-secret sync failure under its reason label
pub fn increment_sync_errors(reason: &str) {
    SECRET_ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_restarts() {
    RESTARTS_TOTAL.inc();
}

pub fn increment_restart_errors(reason: &str) {
    RESTART_ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn observe_vault_fetch_duration(duration: f64) {
    VAULT_FETCH_DURATION.observe(duration);
}

pub fn increment_vault_fetch_errors(reason: &str) {
    VAULT_FETCH_ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_increment_sync_cycles() {
        let before = SYNC_CYCLES_TOTAL.get();
        increment_sync_cycles();
        assert!(SYNC_CYCLES_TOTAL.get() > before);
    }

    #[test]
    fn test_increment_secrets_updated_by_count() {
        let before = SECRETS_UPDATED_TOTAL.get();
        increment_secrets_updated(3);
        assert!(SECRETS_UPDATED_TOTAL.get() >= before + 3);
    }

    #[test]
    fn test_set_secrets_managed() {
        set_secrets_managed(7);
        assert_eq!(SECRETS_MANAGED.get(), 7);
    }

    #[test]
    fn test_labelled_errors_are_counted_per_reason() {
        let before = SECRET_ERRORS_TOTAL.with_label_values(&["parse"]).get();
        increment_sync_errors("parse");
        assert_eq!(
            SECRET_ERRORS_TOTAL.with_label_values(&["parse"]).get(),
            before + 1
        );

        let before = VAULT_FETCH_ERRORS_TOTAL
            .with_label_values(&["unauthorized"])
            .get();
        increment_vault_fetch_errors("unauthorized");
        assert_eq!(
            VAULT_FETCH_ERRORS_TOTAL
                .with_label_values(&["unauthorized"])
                .get(),
            before + 1
        );
    }

    #[test]
    fn test_observe_durations() {
        observe_sync_cycle_duration(1.5);
        observe_vault_fetch_duration(0.2);
        assert!(SYNC_CYCLE_DURATION.get_sample_count() >= 1);
        assert!(VAULT_FETCH_DURATION.get_sample_count() >= 1);
    }
}
