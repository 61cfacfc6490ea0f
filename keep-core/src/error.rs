/*!
Error types for the keep core.
*/

use thiserror::Error;

/// Result type used throughout the keep core.
pub type Result<T> = std::result::Result<T, KeepError>;

/// Errors that can occur during storage, codec and dispatch operations.
#[derive(Error, Debug)]
pub enum KeepError {
    /// Malformed or incomplete storage request, or an unknown action
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Text to tree (or tree to text) conversion failure
    #[error("Format error: {0}")]
    Format(String),

    /// The requested key does not exist in the domain
    #[error("Key not found: {domain}[{key}]")]
    NotFound { domain: String, key: String },

    /// The backend refused a mutation (read-only, closed, I/O failure)
    #[error("Write error: {0}")]
    Write(String),

    /// The backend could not be opened or no active plugin is resolvable
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// I/O errors surfaced by disk-resident backends
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl KeepError {
    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new format error
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Self::Format(msg.into())
    }

    /// Create a new not-found error for a domain/key pair
    pub fn not_found<D: Into<String>, K: Into<String>>(domain: D, key: K) -> Self {
        Self::NotFound {
            domain: domain.into(),
            key: key.into(),
        }
    }

    /// Create a new write error
    pub fn write<S: Into<String>>(msg: S) -> Self {
        Self::Write(msg.into())
    }

    /// Create a new backend-unavailable error
    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// True when the error reports an absent key rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for KeepError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format(err.to_string())
    }
}
