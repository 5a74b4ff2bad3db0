//! Commissioner error type.

use std::fmt;

use thiserror::Error;

/// Result alias used across the commissioner crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a commissioner error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// API misuse (malformed PSKc hex, bad TLV value, ...)
    InvalidArgs,
    /// Operation attempted in the wrong state
    InvalidState,
    /// Missing dataset field, joiner entry or file
    NotFound,
    /// Duplicate joiner or resource
    AlreadyExists,
    /// DTLS, certificate or token failure
    Security,
    /// No response within the operation budget
    Timeout,
    /// Peer declined the request
    Rejected,
    /// Cancelled by `AbortRequests`
    Cancelled,
    /// File or socket error
    IoError,
    /// Broken invariant
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgs => "invalid args",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::Security => "security",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::IoError => "io error",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Structured commissioner error: a kind plus a human-readable detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Create an error with the given kind and detail message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The error classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable detail.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgs, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Security, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::IoError, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_kind_and_detail() {
        let err = Error::new(ErrorKind::Timeout, "MGMT_ACTIVE_SET.req");
        assert_eq!(err.to_string(), "timeout: MGMT_ACTIVE_SET.req");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::IoError);
    }
}
