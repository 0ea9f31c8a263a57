//! Outbox records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Entry, State};

/// Delivery record written in the same transaction as the state and
/// entries it carries.
///
/// The row exists in storage exactly as long as delivery is unconfirmed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatchable {
    /// Unique id, `dsp_` followed by a time-ordered UUID.
    pub id: String,
    /// Creation time, used for the redelivery expiration check.
    pub created_on: DateTime<Utc>,
    /// State written alongside, if any.
    pub state: Option<State>,
    /// Entries appended alongside, with their assigned ids.
    pub entries: Vec<Entry>,
}

impl Dispatchable {
    /// Create a record with a fresh id stamped now.
    pub fn new(state: Option<State>, entries: Vec<Entry>) -> Self {
        Self::with(Self::generate_id(), Utc::now(), state, entries)
    }

    /// Rebuild a record with a known id and creation time.
    pub fn with(
        id: impl Into<String>,
        created_on: DateTime<Utc>,
        state: Option<State>,
        entries: Vec<Entry>,
    ) -> Self {
        Self {
            id: id.into(),
            created_on,
            state,
            entries,
        }
    }

    /// Generate a new dispatchable id.
    pub fn generate_id() -> String {
        format!("dsp_{}", Uuid::now_v7())
    }

    /// Whether the record was created more than `age` before `now`.
    ///
    /// A record stamped after `now` is never older.
    pub fn is_older_than(&self, age: Duration, now: DateTime<Utc>) -> bool {
        (now - self.created_on).to_std().is_ok_and(|elapsed| elapsed > age)
    }

    /// Whether a state travels with this record.
    pub fn has_state(&self) -> bool {
        self.state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn future_records_are_not_older() {
        let now = Utc::now();
        let record = Dispatchable::with("dsp_y", now + chrono::Duration::seconds(5), None, Vec::new());
        assert!(!record.is_older_than(Duration::ZERO, now));
    }

    #[test]
    fn ids_are_prefixed_and_unique() {
        let a = Dispatchable::new(None, Vec::new());
        let b = Dispatchable::new(None, Vec::new());
        assert!(a.id.starts_with("dsp_"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn age_check() {
        let now = Utc::now();
        let record = Dispatchable::with("dsp_x", now - chrono::Duration::seconds(5), None, Vec::new());
        assert!(record.is_older_than(Duration::from_secs(1), now));
        assert!(!record.is_older_than(Duration::from_secs(10), now));
    }
}
