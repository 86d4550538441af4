//! Vault Sync Controller library
//!
//! - `vault`: item paths, items and the vault HTTP client
//! - `controller`: secret builder, synchronizer, restart resolver and applicator
//! - `config`: environment-driven configuration
//! - `observability`: metrics and logging
//! - `runtime`: startup and the poll loop
//! - `server`: metrics and health endpoints

pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod runtime;
pub mod server;
pub mod vault;
