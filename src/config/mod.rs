//! # Configuration
//!
//! Controller configuration loaded from environment variables.

pub mod controller;

pub use controller::{parse_bool_flag, ControllerConfig, NamespaceScope};
