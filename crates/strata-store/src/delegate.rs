//! The storage delegate seam.
//!
//! Journals, readers, state stores and the dispatcher control never touch
//! SQL directly. Each owns one [`StorageDelegate`] and drives it through
//! begin/commit/rollback and the typed calls below. A backend implements
//! [`DelegateFactory`] so every component gets an independent delegate
//! built from the same immutable [`Configuration`].

use strata_core::{Dispatchable, Entry, State};
use tracing::warn;

use crate::config::Configuration;
use crate::errors::Result;

/// An entry read back from a stream together with its stream version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEntry {
    /// Version of the entry within its stream.
    pub stream_version: i64,
    /// The persisted entry.
    pub entry: Entry,
}

/// Backend-specific execution of every storage call the engine makes.
///
/// A delegate holds at most one connection and at most one open
/// transaction. It is used by one owner at a time.
#[cfg_attr(test, mockall::automock)]
pub trait StorageDelegate: Send {
    /// Make sure a live connection is held, reopening a stale one.
    fn ensure_connection(&mut self) -> Result<()>;

    /// Open a transaction.
    fn begin_transaction(&mut self) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction, if any.
    fn rollback(&mut self) -> Result<()>;

    /// Fail if the open transaction has exceeded its think-time budget.
    fn timeout_check(&mut self) -> Result<()>;

    /// Upsert a state into the namespace's table.
    fn write_state(&mut self, namespace: &str, state: &State) -> Result<()>;

    /// Point lookup of a state by id.
    fn read_state(&mut self, namespace: &str, id: &str) -> Result<Option<State>>;

    /// Append an entry outside any stream. Returns the assigned id.
    fn append_entry(&mut self, entry: &Entry) -> Result<i64>;

    /// Append an entry at a stream position. Returns the assigned id.
    ///
    /// A position that is already taken fails with
    /// [`StorageError::ConcurrencyViolation`](crate::StorageError::ConcurrencyViolation).
    fn append_stream_entry(
        &mut self,
        stream_name: &str,
        stream_version: i64,
        entry: &Entry,
    ) -> Result<i64>;

    /// Store a stream snapshot, keyed by its data version.
    fn append_snapshot(&mut self, stream_name: &str, snapshot: &State) -> Result<()>;

    /// Snapshot with the highest data version for the stream.
    fn latest_snapshot(&mut self, stream_name: &str) -> Result<Option<State>>;

    /// Stream entries with version ≥ `from_version`, ascending.
    fn read_stream(&mut self, stream_name: &str, from_version: i64) -> Result<Vec<StreamEntry>>;

    /// Up to `limit` entries with id ≥ `from_id`, ascending.
    fn read_entries(&mut self, from_id: i64, limit: usize) -> Result<Vec<Entry>>;

    /// Total number of entries.
    fn entry_count(&mut self) -> Result<i64>;

    /// Highest assigned entry id, 0 for an empty log.
    fn last_entry_id(&mut self) -> Result<i64>;

    /// Persisted offset of a named reader.
    fn read_offset(&mut self, reader_name: &str) -> Result<Option<i64>>;

    /// Persist the offset of a named reader.
    fn write_offset(&mut self, reader_name: &str, offset: i64) -> Result<()>;

    /// Record a pending dispatchable for `originator_id`.
    fn append_dispatchable(&mut self, originator_id: &str, dispatchable: &Dispatchable) -> Result<()>;

    /// Remove a dispatchable. Deleting a missing id succeeds.
    fn delete_dispatchable(&mut self, id: &str) -> Result<()>;

    /// All pending dispatchables of `originator_id`, oldest first.
    fn query_unconfirmed_dispatchables(&mut self, originator_id: &str) -> Result<Vec<Dispatchable>>;

    /// Roll back anything open and give the connection back.
    fn close(&mut self);
}

/// Builds independent delegates over one backend.
pub trait DelegateFactory: Send + Sync {
    /// A fresh delegate with no connection held yet.
    fn create_delegate(&self) -> Box<dyn StorageDelegate>;

    /// Configuration every delegate is built from.
    fn configuration(&self) -> &Configuration;
}

/// Run `work` in a transaction on `delegate`.
///
/// Commits only if `work` succeeds and the think-time check passes. Any
/// error rolls the transaction back and is returned unchanged; a failing
/// rollback is logged, not reported.
pub fn transactionally<T, F>(delegate: &mut dyn StorageDelegate, work: F) -> Result<T>
where
    F: FnOnce(&mut dyn StorageDelegate) -> Result<T>,
{
    delegate.begin_transaction()?;
    let outcome = work(&mut *delegate).and_then(|value| {
        delegate.timeout_check()?;
        delegate.commit()?;
        Ok(value)
    });

    if outcome.is_err() {
        if let Err(rollback_err) = delegate.rollback() {
            warn!(error = %rollback_err, "rollback failed");
        }
    }
    outcome
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
