//! Reconstructed entity streams.

use super::{Entry, State};

/// Ordered entries of one stream since its reference snapshot.
///
/// Streams are derived on read and never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stream {
    /// Stream name.
    pub stream_name: String,
    /// Highest entry version observed, or the snapshot version if no entry
    /// follows it.
    pub stream_version: i64,
    /// Entries in ascending stream-version order.
    pub entries: Vec<Entry>,
    /// Snapshot the entries apply on top of.
    pub snapshot: Option<State>,
}

impl Stream {
    /// Assemble a stream.
    pub fn new(
        stream_name: impl Into<String>,
        stream_version: i64,
        entries: Vec<Entry>,
        snapshot: Option<State>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            stream_version,
            entries,
            snapshot,
        }
    }

    /// A stream that has no entries and no snapshot yet.
    pub fn empty(stream_name: impl Into<String>) -> Self {
        Self::new(stream_name, 0, Vec::new(), None)
    }

    /// Degraded result returned when loading the stream failed.
    ///
    /// Distinguished from [`Stream::empty`] only by its version of 1.
    pub fn unavailable(stream_name: impl Into<String>) -> Self {
        Self::new(stream_name, 1, Vec::new(), None)
    }

    /// Whether a reference snapshot was found.
    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Whether the stream carries neither entries nor a snapshot.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.snapshot.is_none()
    }

    /// Number of entries after the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
