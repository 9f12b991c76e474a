/// Error types for probing, alerting and configuration
pub mod error;

/// Probe-service protocol events
pub mod events;

/// Per-node result classification
pub mod classifier;

/// Batch aggregation of node results
pub mod aggregator;

/// Alert decision rules and health grading
pub mod triggers;

/// Probe session against the distributed probe service
pub mod probe;

/// Alert sinks and message rendering
pub mod alerts;

/// Configuration management
pub mod config;

/// Monitoring passes and checks
pub mod monitor;

// Re-export commonly used types
pub use error::{AlertError, ConfigError, ProbeError};
