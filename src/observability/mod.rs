//! Process observability: structured logging and metrics
//!
//! Logging goes through the tracing stack with JSON output by default.
//! Metrics are process-wide atomic counters covering the broker session
//! and trace export health.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};
