//! Client error types

use thiserror::Error;

/// Errors from the HTTP collaborators
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connect, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an unexpected status
    #[error("API error: {status} on {path}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Request path
        path: String,
    },

    /// A response body could not be decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Client construction failed
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
