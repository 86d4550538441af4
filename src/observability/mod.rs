//! # Observability
//!
//! - `metrics`: Prometheus metrics collection
//! - `logging`: tracing subscriber setup (text or JSON)

pub mod logging;
pub mod metrics;
