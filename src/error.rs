//! Error types for rosterdb.
//!
//! All errors in rosterdb are strongly typed using thiserror.
//! Storage backends report [`StorageError`]; the [`Database`](crate::Database)
//! handle and the query/loader layers surface [`RosterError`].

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors raised while turning an incoming record into stored fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' cannot be empty")]
    EmptyField {
        field: String,
    },

    #[error("Unknown field '{field}' for {kind}")]
    UnknownField {
        kind: String,
        field: String,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        field: String,
        reason: String,
    },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::MissingField`].
    #[must_use]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Shorthand for [`ValidationError::InvalidValue`].
    #[must_use]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Coarse error taxonomy shared by every layer.
///
/// There is no duplicate kind: duplicates are reported as values
/// ([`UpsertOutcome`](crate::UpsertOutcome), [`ApplyOutcome`](crate::ApplyOutcome)),
/// never as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A lookup missed.
    NotFound,
    /// A foreign-key target does not exist.
    InvalidReference,
    /// A required field is missing or a value cannot be parsed.
    MalformedInput,
    /// The atomic supersede lost its compare-and-swap too many times.
    ConcurrencyConflict,
    /// Configuration was rejected.
    Config,
    /// Backend or invariant failure.
    Internal,
}

/// Top-level error type for rosterdb.
#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl RosterError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classifies this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::MalformedInput,
            Self::Storage(e) => e.kind(),
            Self::Config { .. } => ErrorKind::Config,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if this is a lookup miss.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound)
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::ConcurrencyConflict)
    }
}

/// Result type alias for rosterdb operations.
pub type RosterResult<T> = Result<T, RosterError>;
