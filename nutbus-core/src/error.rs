//! Error types shared by the bus client, telemetry sources and storage sinks.

use std::time::Duration;

/// Failures of the pub/sub client core.
///
/// None of these are fatal: callers log them and let the reconnect loop
/// (or the next scheduled cycle) recover.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("not connected to broker")]
    NotConnected,
    #[error("broker handshake did not complete within {0:?}")]
    Timeout(Duration),
    #[error("broker refused connection: {0}")]
    Refused(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("request rejected by client queue: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("invalid topic or pattern: {0}")]
    InvalidTopic(String),
    #[error("{failed} of {total} messages could not be queued")]
    Incomplete { failed: usize, total: usize },
    #[error("event loop stopped before handshake")]
    Closed,
}

/// Failures of a telemetry source (NUT server or test double).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("telemetry source not connected")]
    NotConnected,
    #[error("telemetry request timed out after {0:?}")]
    Timeout(Duration),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Failures of a storage sink. All are treated as retryable.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage rejected row: {0}")]
    Rejected(String),
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),
    #[error("storage task failed: {0}")]
    Task(String),
}
