//! Unified error types for both ledger services.
//!
//! Business outcomes that callers must tell apart (validation, not-found, conflict)
//! are explicit variants; infrastructure faults (broker, database, I/O) are reported
//! as transient so the relay and consumer loops know to retry them.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected before anything was written (non-positive amount, malformed input).
    #[error("Validation failed: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// An order, account or message that the operation needs does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up
        entity: &'static str,
        /// Identifier used for the lookup
        id: String,
    },

    /// The operation would duplicate a record that must be unique (e.g. a second account).
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflicting record
        message: String,
    },

    /// Connection or channel failure while talking to the message broker.
    #[error("Broker error: {message}")]
    Broker {
        /// Underlying broker failure text
        message: String,
    },

    /// Failure reported by the ledger store.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// An envelope could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be read or is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong while loading configuration
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Builds a [`Error::Validation`] from any message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Builds a [`Error::NotFound`] for the given record kind and id.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Builds a [`Error::Broker`] from any displayable broker failure.
    pub fn broker(err: impl std::fmt::Display) -> Self {
        Self::Broker {
            message: err.to_string(),
        }
    }

    /// Whether this is an infrastructure fault that a later retry may resolve.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Broker { .. } | Self::Database(_) | Self::Io(_))
    }
}

impl From<lapin::Error> for Error {
    fn from(value: lapin::Error) -> Self {
        Self::broker(value)
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
