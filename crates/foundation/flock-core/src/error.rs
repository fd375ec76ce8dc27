//! Error taxonomy for Flock operations
//!
//! Every public operation returns [`Result`]. Backing-store failures are
//! converted into one of these variants at the operation boundary, so the
//! presentation layer always receives a kind plus a message.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result type for Flock operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Flock
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No authenticated caller")]
    Unauthenticated,

    #[error("Transaction conflict after {attempts} attempts")]
    TransactionConflict { attempts: u32 },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Author {author_uid} of {entity_id} no longer exists")]
    OrphanedAuthor {
        entity_id: String,
        author_uid: String,
    },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Discriminant of [`Error`], cheap to copy into UI state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Unauthenticated,
    TransactionConflict,
    Timeout,
    OrphanedAuthor,
    InvalidFilter,
    InvalidInput,
    Store,
    Serialization,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Unauthenticated => ErrorKind::Unauthenticated,
            Error::TransactionConflict { .. } => ErrorKind::TransactionConflict,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::OrphanedAuthor { .. } => ErrorKind::OrphanedAuthor,
            Error::InvalidFilter(_) => ErrorKind::InvalidFilter,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Store(_) => ErrorKind::Store,
            Error::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether a caller should retry this failure at least once before
    /// surfacing it to the user
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransactionConflict | ErrorKind::Timeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::TransactionConflict => "transaction_conflict",
            ErrorKind::Timeout => "timeout",
            ErrorKind::OrphanedAuthor => "orphaned_author",
            ErrorKind::InvalidFilter => "invalid_filter",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Store => "store",
            ErrorKind::Serialization => "serialization",
        };
        write!(f, "{}", name)
    }
}
