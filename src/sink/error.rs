//! Error types for the metrics sink

use std::time::Duration;

use thiserror::Error;

/// Result type alias for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Errors that can occur while delivering values or using the control API
#[derive(Debug, Error)]
pub enum SinkError {
    /// Login failed or no token is available; control-plane calls are blocked
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    /// The control API answered with a JSON-RPC error object
    #[error("control API error {code}: {message} {data}")]
    Rpc {
        code: i64,
        message: String,
        data: String,
    },

    /// HTTP transport failure towards the control API
    #[error("control API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("host {0} not found")]
    HostNotFound(String),

    /// Malformed or incomplete sender-protocol frame
    #[error("sender protocol error: {0}")]
    Protocol(String),

    /// The backend answered but did not accept every value
    #[error("values not processed: {0}")]
    Rejected(String),

    /// The external sender tool could not be run or reported failure
    #[error("external sender failed: {0}")]
    ExternalTool(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
