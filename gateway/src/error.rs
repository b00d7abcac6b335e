//! Error types for the ingest gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration error (parse or validation failure)
    #[error("configuration error: {0}")]
    Config(String),

    /// Kafka producer construction or lifecycle error
    #[error("kafka producer error: {0}")]
    Kafka(String),

    /// Startup probe failure
    #[error("kafka startup probe failed: {0}")]
    Probe(String),

    /// Metric registration error
    #[error("metrics error: {0}")]
    Metrics(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
