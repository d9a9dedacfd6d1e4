//! Prometheus metrics and the optional /metrics HTTP endpoint.

pub mod registry;
pub mod server;

pub use registry::Metrics;
pub use server::start_metrics_server;
