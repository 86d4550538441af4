//! # Runtime
//!
//! Process wiring for the controller binary.
//!
//! - `initialization`: rustls, logging, metrics, health server, clients
//! - `poll_loop`: timer and on-demand (SIGHUP) driven sync cycles, graceful shutdown

pub mod initialization;
pub mod poll_loop;

pub use initialization::{initialize, InitializationResult};
pub use poll_loop::{
    forward_hangups, run_poll_loop, shutdown_signal, SyncTrigger, TriggerSource,
};
