//! Core error types

use thiserror::Error;

/// Errors produced by run-list handling and expansion
#[derive(Debug, Error)]
pub enum CoreError {
    /// A run-list entry matched none of the recognized forms
    #[error("unrecognized run list entry: {0:?}")]
    UnrecognizedEntry(String),

    /// A role referenced by a run list could not be resolved
    #[error("failed to resolve role {role}: {message}")]
    RoleFetch {
        /// Name of the role being resolved
        role: String,
        /// What the backend said went wrong
        message: String,
    },
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
