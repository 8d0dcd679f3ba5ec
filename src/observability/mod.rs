//! Observability for the MQTT client
//!
//! Structured logging setup and per-session metrics.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, level_from_verbosity, parse_level, LogFormat};
pub use metrics::{MetricsSnapshot, SessionMetrics};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span};
