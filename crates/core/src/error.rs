//! Error types for stack-core
//!
//! Provides a unified error type whose variants map one-to-one onto the
//! failure kinds a caller may want to branch on.

use thiserror::Error;

/// Result type alias for stack-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for stack-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Login rejected (bad credentials or the service refused the login)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Operation attempted without an authenticated session
    #[error("Not logged in: {0}")]
    NotLoggedIn(String),

    /// Authorization failure on an otherwise valid session
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Path or user does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Path exists but has the wrong kind (file vs directory)
    #[error("Wrong node kind: {0}")]
    WrongKind(String),

    /// Malformed or out-of-root path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Share parameters rejected locally or by the service
    #[error("Share error: {0}")]
    Share(String),

    /// Operation on a node or user that was deleted
    #[error("Stale object: {0}")]
    StaleNode(String),

    /// Transport failure (DNS, TLS, connection reset, timeout)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Remote conflict, e.g. an account that already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upload or download did not complete intact
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Unexpected answer from the service
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Input rejected before any request was made
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Stable discriminant of an [`Error`], for callers that match on the kind
/// rather than the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    NotLoggedIn,
    AccessDenied,
    NotFound,
    WrongKind,
    InvalidPath,
    Share,
    StaleNode,
    Connection,
    Conflict,
    Transfer,
    Api,
    Validation,
    Config,
    Io,
    Serialization,
}

impl Error {
    /// Get the kind of this error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::NotLoggedIn(_) => ErrorKind::NotLoggedIn,
            Error::AccessDenied(_) => ErrorKind::AccessDenied,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::WrongKind(_) => ErrorKind::WrongKind,
            Error::InvalidPath(_) | Error::InvalidUrl(_) => ErrorKind::InvalidPath,
            Error::Share(_) => ErrorKind::Share,
            Error::StaleNode(_) => ErrorKind::StaleNode,
            Error::Connection(_) => ErrorKind::Connection,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Transfer(_) => ErrorKind::Transfer,
            Error::Api { .. } => ErrorKind::Api,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) | Error::TomlParse(_) | Error::TomlSerialize(_) => {
                ErrorKind::Serialization
            }
        }
    }

    /// Whether the failure happened below the HTTP layer
    pub const fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}
