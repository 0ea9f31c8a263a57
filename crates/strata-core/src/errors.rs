//! Error types shared by the storage engine.
//!
//! [`CodecError`] covers every failure converting between domain values and
//! raw payloads. [`ResultKind`] is the outcome taxonomy that storage errors
//! are classified into, so callers can branch on *what kind* of failure
//! happened without matching on backend-specific variants.

use thiserror::Error;

/// Outcome classification for storage operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultKind {
    /// The operation completed.
    Success,
    /// A point read found no row for the requested id.
    NotFound,
    /// The logical type has no registered storage namespace.
    NoTypeStore,
    /// A caller precondition was violated (missing id, type or state).
    Error,
    /// The storage backend or transport failed.
    Failure,
    /// No connection lease was available.
    PoolExhausted,
    /// A stale writer lost an optimistic version check.
    ConcurrencyViolation,
}

impl ResultKind {
    /// Whether this kind represents a successful outcome.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Stable lowercase name for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NotFound => "not_found",
            Self::NoTypeStore => "no_type_store",
            Self::Error => "error",
            Self::Failure => "failure",
            Self::PoolExhausted => "pool_exhausted",
            Self::ConcurrencyViolation => "concurrency_violation",
        }
    }
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors converting between domain values and raw payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// No decoder is registered for the type tag and version.
    #[error("no decoder registered for {type_name} v{type_version}")]
    Unregistered {
        /// Type tag found on the entry.
        type_name: String,
        /// Schema version found on the entry.
        type_version: u32,
    },

    /// The raw value carries a different type tag than the one requested.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Type tag the caller asked for.
        expected: String,
        /// Type tag stored on the raw value.
        found: String,
    },

    /// JSON encoding or decoding failed.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_display() {
        let err = CodecError::Unregistered {
            type_name: "AccountOpened".into(),
            type_version: 2,
        };
        assert_eq!(err.to_string(), "no decoder registered for AccountOpened v2");
    }

    #[test]
    fn type_mismatch_display() {
        let err = CodecError::TypeMismatch {
            expected: "Account".into(),
            found: "Order".into(),
        };
        assert_eq!(err.to_string(), "type mismatch: expected Account, found Order");
    }

    #[test]
    fn from_serde_error() {
        let serde_err = serde_json::from_str::<String>("nope").unwrap_err();
        let err: CodecError = serde_err.into();
        assert!(matches!(err, CodecError::Serde(_)));
    }

    #[test]
    fn result_kind_names() {
        assert_eq!(ResultKind::PoolExhausted.to_string(), "pool_exhausted");
        assert_eq!(ResultKind::NoTypeStore.as_str(), "no_type_store");
        assert!(ResultKind::Success.is_success());
        assert!(!ResultKind::Failure.is_success());
    }
}
