//! Named, resumable cursors over the journal.
//!
//! An [`EntryReader`] walks the entry log in id order from a persisted
//! offset. The offset of a new reader name starts at 1; an existing name
//! resumes where it left off. After each batch the offset moves to one past
//! the last id returned and is persisted. If that write fails the batch is
//! still returned and the write is retried before the next read, so a
//! crash in between replays entries rather than skipping them.
//!
//! Readers never surface driver errors from reads: an unrecoverable failure
//! reads as "nothing available" and is logged.
//!
//! One reader name must not be shared by concurrently running readers.

use strata_core::{Entry, SeekToken};
use tracing::{debug, warn};

use crate::delegate::StorageDelegate;
use crate::errors::Result;

/// Cursor over the entry log, persisted under a name.
pub struct EntryReader {
    name: String,
    delegate: Box<dyn StorageDelegate>,
    offset: i64,
    restored: bool,
    dirty: bool,
}

impl EntryReader {
    /// Open the reader `name`, restoring its persisted offset.
    pub fn open(name: impl Into<String>, delegate: Box<dyn StorageDelegate>) -> Self {
        let mut reader = Self {
            name: name.into(),
            delegate,
            offset: 1,
            restored: false,
            dirty: false,
        };
        if let Err(err) = reader.restore() {
            warn!(reader = %reader.name, error = %err, "failed to restore offset, will retry");
        }
        reader
    }

    /// Reader name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the next entry to read.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Next entry, if any.
    pub fn read_next(&mut self) -> Option<Entry> {
        self.read_next_batch(1).into_iter().next()
    }

    /// Up to `max` entries starting at the current offset.
    pub fn read_next_batch(&mut self, max: usize) -> Vec<Entry> {
        if max == 0 || !self.prepare() {
            return Vec::new();
        }

        let entries = match self.delegate.read_entries(self.offset, max) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(reader = %self.name, offset = self.offset, error = %err, "read failed");
                return Vec::new();
            }
        };

        if let Some(last) = entries.last().and_then(Entry::sequence) {
            self.offset = last + 1;
            self.persist();
        }
        entries
    }

    /// Move to `from_id`, then read the next entry.
    pub fn read_next_from(&mut self, from_id: &str) -> Option<Entry> {
        self.read_next_batch_from(from_id, 1).into_iter().next()
    }

    /// Move to `from_id`, then read up to `max` entries.
    pub fn read_next_batch_from(&mut self, from_id: &str, max: usize) -> Vec<Entry> {
        match from_id.parse::<i64>() {
            Ok(id) => {
                let _ = self.seek_to(SeekToken::Offset(id));
                self.read_next_batch(max)
            }
            Err(_) => {
                warn!(reader = %self.name, from_id, "entry id is not numeric");
                Vec::new()
            }
        }
    }

    /// Reposition the reader and return the new offset.
    ///
    /// Every token but [`SeekToken::Query`] persists the new offset.
    pub fn seek_to(&mut self, token: SeekToken) -> i64 {
        match token {
            SeekToken::Query => return self.offset,
            SeekToken::Beginning => self.offset = 1,
            SeekToken::Offset(offset) => self.offset = offset,
            SeekToken::End => {
                if !self.prepare() {
                    return self.offset;
                }
                match self.delegate.last_entry_id() {
                    Ok(last) => self.offset = last + 1,
                    Err(err) => {
                        warn!(reader = %self.name, error = %err, "failed to find end of log");
                        return self.offset;
                    }
                }
            }
        }
        // An explicit seek wins over whatever was stored.
        self.restored = true;
        self.persist();
        self.offset
    }

    /// Back to offset 1.
    pub fn rewind(&mut self) {
        let _ = self.seek_to(SeekToken::Beginning);
    }

    /// Number of entries in the log, or -1 if it cannot be determined.
    pub fn size(&mut self) -> i64 {
        if !self.prepare() {
            return -1;
        }
        self.delegate.entry_count().unwrap_or_else(|err| {
            warn!(reader = %self.name, error = %err, "failed to count entries");
            -1
        })
    }

    /// Flush a pending offset write and release the connection.
    pub fn close(&mut self) {
        if self.dirty && self.delegate.ensure_connection().is_ok() {
            self.persist();
        }
        self.delegate.close();
    }

    fn restore(&mut self) -> Result<()> {
        self.delegate.ensure_connection()?;
        if let Some(offset) = self.delegate.read_offset(&self.name)? {
            self.offset = offset;
        }
        self.restored = true;
        debug!(reader = %self.name, offset = self.offset, "reader opened");
        Ok(())
    }

    fn prepare(&mut self) -> bool {
        if let Err(err) = self.delegate.ensure_connection() {
            warn!(reader = %self.name, error = %err, "no connection");
            return false;
        }
        if !self.restored {
            if let Err(err) = self.restore() {
                warn!(reader = %self.name, error = %err, "failed to restore offset");
                return false;
            }
        }
        if self.dirty {
            self.persist();
        }
        true
    }

    fn persist(&mut self) {
        let written = self
            .delegate
            .ensure_connection()
            .and_then(|()| self.delegate.write_offset(&self.name, self.offset));
        match written {
            Ok(()) => self.dirty = false,
            Err(err) => {
                warn!(
                    reader = %self.name,
                    offset = self.offset,
                    error = %err,
                    "failed to persist offset, will retry"
                );
                self.dirty = true;
            }
        }
    }
}

impl std::fmt::Debug for EntryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryReader")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
