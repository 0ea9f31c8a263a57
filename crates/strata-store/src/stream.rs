//! Stream reconstruction from snapshot plus subsequent entries.

use strata_core::Stream;
use tracing::warn;

use crate::delegate::StorageDelegate;
use crate::errors::Result;

/// Loads [`Stream`]s for replay.
pub struct StreamReader {
    name: String,
    delegate: Box<dyn StorageDelegate>,
}

impl StreamReader {
    /// Reader `name` over `delegate`.
    pub fn new(name: impl Into<String>, delegate: Box<dyn StorageDelegate>) -> Self {
        Self {
            name: name.into(),
            delegate,
        }
    }

    /// Reader name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The whole stream, from version 1.
    pub fn stream(&mut self, stream_name: &str) -> Stream {
        self.stream_for(stream_name, 1)
    }

    /// The stream from `from_version` on, degrading to
    /// [`Stream::unavailable`] if it cannot be loaded.
    pub fn stream_for(&mut self, stream_name: &str, from_version: i64) -> Stream {
        self.try_stream_for(stream_name, from_version)
            .unwrap_or_else(|err| {
                warn!(reader = %self.name, stream = stream_name, error = %err, "failed to load stream");
                Stream::unavailable(stream_name)
            })
    }

    /// The stream from `from_version` on.
    ///
    /// The latest snapshot is used as the reference point when its data
    /// version is at least `from_version`; entries are then read from the
    /// snapshot's version instead. A stream with neither entries nor a
    /// usable snapshot comes back as [`Stream::empty`].
    pub fn try_stream_for(&mut self, stream_name: &str, from_version: i64) -> Result<Stream> {
        self.delegate.ensure_connection()?;

        let snapshot = self
            .delegate
            .latest_snapshot(stream_name)?
            .filter(|snapshot| snapshot.data_version >= from_version);
        let read_from = snapshot
            .as_ref()
            .map_or(from_version, |snapshot| snapshot.data_version);

        let rows = self.delegate.read_stream(stream_name, read_from)?;
        let stream_version = rows
            .last()
            .map(|row| row.stream_version)
            .or_else(|| snapshot.as_ref().map(|s| s.data_version));

        let Some(stream_version) = stream_version else {
            return Ok(Stream::empty(stream_name));
        };
        let entries = rows.into_iter().map(|row| row.entry).collect();
        Ok(Stream::new(stream_name, stream_version, entries, snapshot))
    }

    /// Release the connection.
    pub fn close(&mut self) {
        self.delegate.close();
    }
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use strata_core::{Entry, Metadata, State};

    use super::*;
    use crate::delegate::{MockStorageDelegate, StreamEntry};
    use crate::errors::StorageError;

    fn row(version: i64) -> StreamEntry {
        StreamEntry {
            stream_version: version,
            entry: Entry::persisted(
                (version * 10).to_string(),
                "E",
                1,
                "{}".into(),
                Metadata::new(),
            ),
        }
    }

    fn snapshot(version: i64) -> State {
        State::new("s", "Account", 1, "{}", version, Metadata::new())
    }

    fn mock(snap: Option<State>) -> MockStorageDelegate {
        let mut delegate = MockStorageDelegate::new();
        delegate.expect_ensure_connection().returning(|| Ok(()));
        delegate
            .expect_latest_snapshot()
            .returning(move |_| Ok(snap.clone()));
        delegate
    }

    #[test]
    fn reads_from_requested_version_without_snapshot() {
        let mut delegate = mock(None);
        delegate
            .expect_read_stream()
            .withf(|name, from| name == "s" && *from == 1)
            .returning(|_, _| Ok(vec![row(1), row(2), row(3)]));

        let stream = StreamReader::new("r", Box::new(delegate)).stream("s");
        assert_eq!(stream.stream_version, 3);
        assert_eq!(stream.entries.len(), 3);
        assert!(!stream.has_snapshot());
    }

    #[test]
    fn snapshot_moves_read_point() {
        let mut delegate = mock(Some(snapshot(5)));
        delegate
            .expect_read_stream()
            .withf(|name, from| name == "s" && *from == 5)
            .returning(|_, _| Ok(vec![row(5), row(6)]));

        let stream = StreamReader::new("r", Box::new(delegate)).stream_for("s", 2);
        assert_eq!(stream.snapshot.map(|s| s.data_version), Some(5));
        assert_eq!(stream.stream_version, 6);
        assert_eq!(stream.entries.len(), 2);
    }

    #[test]
    fn older_snapshot_is_ignored() {
        let mut delegate = mock(Some(snapshot(3)));
        delegate
            .expect_read_stream()
            .withf(|name, from| name == "s" && *from == 4)
            .returning(|_, _| Ok(vec![row(4)]));

        let stream = StreamReader::new("r", Box::new(delegate)).stream_for("s", 4);
        assert!(!stream.has_snapshot());
        assert_eq!(stream.stream_version, 4);
    }

    #[test]
    fn snapshot_without_later_entries_sets_version() {
        let mut delegate = mock(Some(snapshot(8)));
        delegate.expect_read_stream().returning(|_, _| Ok(Vec::new()));

        let stream = StreamReader::new("r", Box::new(delegate)).stream("s");
        assert_eq!(stream.stream_version, 8);
        assert!(stream.entries.is_empty());
        assert!(stream.has_snapshot());
    }

    #[test]
    fn unknown_stream_is_empty_not_unavailable() {
        let mut delegate = mock(None);
        delegate.expect_read_stream().returning(|_, _| Ok(Vec::new()));

        let stream = StreamReader::new("r", Box::new(delegate)).stream("nobody");
        assert_eq!(stream, Stream::empty("nobody"));
    }

    #[test]
    fn failure_degrades_to_unavailable() {
        let mut delegate = mock(None);
        delegate
            .expect_read_stream()
            .returning(|_, _| Err(StorageError::Sqlite(rusqlite::Error::InvalidQuery)));

        let mut reader = StreamReader::new("r", Box::new(delegate));
        assert_matches!(reader.try_stream_for("s", 1), Err(StorageError::Sqlite(_)));
        assert_eq!(reader.stream_for("s", 1), Stream::unavailable("s"));
    }
}
