//! # Observability
//!
//! Observability modules for the operator.
//!
//! - `metrics`: Prometheus metrics collection

pub mod metrics;

// Re-export for convenience
pub use metrics::*;
