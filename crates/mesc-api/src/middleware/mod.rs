//! # HTTP Middleware
//!
//! - [`metrics`]: request and error counters, mirrored to the `metrics`
//!   facade for Prometheus export.
//! - [`tracing_layer`]: `tower-http` request spans.

pub mod metrics;
pub mod tracing_layer;
