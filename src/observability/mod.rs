//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing setup
//! - OpenTelemetry metrics for task outcomes and rollbacks

pub mod metrics;
pub mod tracing;
