//! # Poll Loop
//!
//! Runs a sync cycle on every tick of a fixed interval (the first tick fires
//! immediately) and whenever a [`SyncTrigger`] is fired. A cycle that cannot
//! list secrets is logged and retried on the next tick.
//!
//! On shutdown the synchronizer's shutdown flag is raised so no new per-secret
//! work starts, the readiness endpoint flips to 503, and the loop exits once the
//! in-flight cycle (if any) has finished.

use crate::controller::SecretSynchronizer;
use crate::server::ServerState;
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, info_span, Instrument};

/// What started a sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Timer,
    OnDemand,
}

impl TriggerSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerSource::Timer => "timer",
            TriggerSource::OnDemand => "on-demand",
        }
    }
}

/// Handle that requests an immediate sync cycle
///
/// Requests made while a cycle is running collapse into one follow-up cycle.
/// The controller binary fires it on SIGHUP ([`forward_hangups`]); an
/// embedding process can fire it from its own watchers.
#[derive(Debug, Clone, Default)]
pub struct SyncTrigger {
    notify: Arc<Notify>,
}

impl SyncTrigger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.notify.notify_one();
    }

    async fn requested(&self) {
        self.notify.notified().await;
    }
}

/// Resolves on SIGINT, or on SIGTERM where available
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Request a sync cycle on every SIGHUP
///
/// Runs until the process exits. Does nothing where SIGHUP does not exist.
pub async fn forward_hangups(trigger: SyncTrigger) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(sighup) => sighup,
            Err(e) => {
                error!("Failed to install SIGHUP handler: {}", e);
                return;
            }
        };
        while sighup.recv().await.is_some() {
            info!("SIGHUP received, requesting a sync cycle");
            trigger.request();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = trigger;
    }
}

/// Drive sync cycles until `shutdown` resolves
pub async fn run_poll_loop<F>(
    synchronizer: Arc<SecretSynchronizer>,
    interval: Duration,
    trigger: SyncTrigger,
    server_state: Arc<ServerState>,
    shutdown: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    let stop_flag = synchronizer.shutdown_flag();
    let stopped = Arc::new(Notify::new());

    tokio::spawn({
        let stop_flag = Arc::clone(&stop_flag);
        let stopped = Arc::clone(&stopped);
        let server_state = Arc::clone(&server_state);
        async move {
            shutdown.await;
            info!("Received shutdown signal, finishing in-flight work...");
            stop_flag.store(true, Ordering::Relaxed);
            server_state.set_ready(false);
            stopped.notify_one();
        }
    });

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Polling every {}s", interval.as_secs());

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            break;
        }

        let source = tokio::select! {
            _ = ticker.tick() => TriggerSource::Timer,
            () = trigger.requested() => TriggerSource::OnDemand,
            () = stopped.notified() => break,
        };

        let span = info_span!("vaultsync.poll.cycle", trigger = source.as_str());
        match synchronizer.synchronize(Utc::now()).instrument(span).await {
            Ok(_) => {
                if !stop_flag.load(Ordering::Relaxed) && !server_state.ready() {
                    server_state.set_ready(true);
                    info!("First sync cycle complete, controller is ready");
                }
            }
            Err(e) => error!("Sync cycle aborted, retrying on next tick: {}", e),
        }
    }

    info!("Poll loop stopped");
}
