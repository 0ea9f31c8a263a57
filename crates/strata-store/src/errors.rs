//! Error types for the storage engine.
//!
//! [`StorageError`] is returned by every journal, reader, state store and
//! outbox operation. [`StorageError::kind`] folds it into the
//! [`ResultKind`] taxonomy so callers can branch on the outcome class
//! without matching backend-specific variants.

use std::time::Duration;

use strata_core::{CodecError, ResultKind};
use thiserror::Error;

use crate::pool::PoolError;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A point read found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The state type has no registered namespace.
    #[error("no type store registered for {0}")]
    NoTypeStore(String),

    /// A caller precondition was violated before any I/O.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// A stale version lost the optimistic check, or a stream version was
    /// appended twice.
    #[error("concurrency violation: {0}")]
    ConcurrencyViolation(String),

    /// The transaction stayed open past its think-time budget.
    #[error("transaction open longer than {0:?}")]
    TransactionTimeout(Duration),

    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Payload encode/decode error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Connection lease pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] PoolError),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },
}

impl StorageError {
    /// Outcome class of this error.
    pub fn kind(&self) -> ResultKind {
        match self {
            Self::NotFound(_) => ResultKind::NotFound,
            Self::NoTypeStore(_) => ResultKind::NoTypeStore,
            Self::Invalid(_) => ResultKind::Error,
            Self::ConcurrencyViolation(_) => ResultKind::ConcurrencyViolation,
            Self::Pool(PoolError::Exhausted { .. }) => ResultKind::PoolExhausted,
            Self::TransactionTimeout(_)
            | Self::Sqlite(_)
            | Self::Serde(_)
            | Self::Codec(_)
            | Self::Pool(_)
            | Self::Migration { .. } => ResultKind::Failure,
        }
    }
}

/// Convenience type alias for storage results.
pub type Result<T> = std::result::Result<T, StorageError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
