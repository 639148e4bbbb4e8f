//! Error types for telemetry stream setup

use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias for telemetry stream operations
pub type Result<T> = std::result::Result<T, TelemetryStreamError>;

/// Errors raised while building a streaming client
///
/// Errors on a running stream are never raised; they surface as
/// [`StreamError`](crate::StreamError) in the observable state.
#[derive(Error, Debug)]
pub enum TelemetryStreamError {
    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Transport could not be created
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TelemetryStreamError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
