//! The append side of the entry log.
//!
//! Every append call runs in one transaction on the journal's own delegate:
//! the entries at consecutive stream versions, the optional snapshot, and
//! the outbox row when a dispatcher is attached. The listener and the
//! dispatcher only hear about an append after it committed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use strata_core::{Dispatchable, Entry, State};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::delegate::{DelegateFactory, StorageDelegate, transactionally};
use crate::dispatch::{Dispatcher, DispatcherControl, Outbox};
use crate::errors::{Result, StorageError};
use crate::reader::EntryReader;
use crate::stream::StreamReader;

/// Observer of committed appends.
///
/// Every method defaults to a no-op. Calls happen on the appending thread,
/// after commit and before the dispatcher sees the append.
pub trait JournalListener: Send + Sync {
    /// One entry was appended.
    fn appended(&self, entry: &Entry) {
        let _ = entry;
    }

    /// One entry was appended together with a snapshot.
    fn appended_with(&self, entry: &Entry, snapshot: &State) {
        let _ = (entry, snapshot);
    }

    /// A batch was appended.
    fn appended_all(&self, entries: &[Entry]) {
        let _ = entries;
    }

    /// A batch was appended together with a snapshot.
    fn appended_all_with(&self, entries: &[Entry], snapshot: &State) {
        let _ = (entries, snapshot);
    }
}

/// Listener that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopListener;

impl JournalListener for NoopListener {}

#[derive(Clone, Copy)]
enum Shape {
    Single,
    Batch,
}

/// Appends entries to streams and hands out readers over the log.
pub struct Journal {
    delegate: Mutex<Box<dyn StorageDelegate>>,
    factory: Arc<dyn DelegateFactory>,
    outbox: Option<Outbox>,
    listener: Arc<dyn JournalListener>,
    entry_readers: Mutex<HashMap<String, Arc<Mutex<EntryReader>>>>,
    stream_readers: Mutex<HashMap<String, Arc<Mutex<StreamReader>>>>,
}

impl Journal {
    /// Journal over `factory`. With a dispatcher, every append is also
    /// recorded in the outbox and delivered after commit.
    ///
    /// Outbox rows are written under `<originator_id>.journal`.
    pub fn new(factory: Arc<dyn DelegateFactory>, dispatcher: Option<Arc<dyn Dispatcher>>) -> Self {
        let originator_id = format!("{}.journal", factory.configuration().originator_id);
        Self::for_originator(factory, dispatcher, originator_id)
    }

    /// Journal whose outbox rows are written and swept under `originator_id`.
    pub fn for_originator(
        factory: Arc<dyn DelegateFactory>,
        dispatcher: Option<Arc<dyn Dispatcher>>,
        originator_id: impl Into<String>,
    ) -> Self {
        let delegate = factory.create_delegate();
        let originator_id = originator_id.into();
        let outbox = dispatcher
            .map(|dispatcher| Outbox::attach(factory.as_ref(), dispatcher, originator_id));
        Self {
            delegate: Mutex::new(delegate),
            factory,
            outbox,
            listener: Arc::new(NoopListener),
            entry_readers: Mutex::new(HashMap::new()),
            stream_readers: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn JournalListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Append `entry` at `stream_version` of `stream_name`.
    ///
    /// Returns the entry carrying its assigned id. A version that is
    /// already taken fails with [`StorageError::ConcurrencyViolation`].
    pub fn append(&self, stream_name: &str, stream_version: i64, entry: Entry) -> Result<Entry> {
        let mut appended =
            self.append_batch(stream_name, stream_version, vec![entry], None, Shape::Single)?;
        Ok(appended.swap_remove(0))
    }

    /// [`append`](Self::append) plus a snapshot written in the same
    /// transaction.
    pub fn append_with(
        &self,
        stream_name: &str,
        stream_version: i64,
        entry: Entry,
        snapshot: State,
    ) -> Result<Entry> {
        let mut appended = self.append_batch(
            stream_name,
            stream_version,
            vec![entry],
            Some(snapshot),
            Shape::Single,
        )?;
        Ok(appended.swap_remove(0))
    }

    /// Append `entries` at consecutive versions starting at `from_version`.
    ///
    /// All or nothing: one failing insert rolls back the whole batch.
    pub fn append_all(
        &self,
        stream_name: &str,
        from_version: i64,
        entries: Vec<Entry>,
    ) -> Result<Vec<Entry>> {
        self.append_batch(stream_name, from_version, entries, None, Shape::Batch)
    }

    /// [`append_all`](Self::append_all) plus a snapshot written in the same
    /// transaction.
    pub fn append_all_with(
        &self,
        stream_name: &str,
        from_version: i64,
        entries: Vec<Entry>,
        snapshot: State,
    ) -> Result<Vec<Entry>> {
        self.append_batch(stream_name, from_version, entries, Some(snapshot), Shape::Batch)
    }

    /// The entry reader called `name`, created on first use.
    pub fn entry_reader(&self, name: &str) -> Arc<Mutex<EntryReader>> {
        let mut readers = self.entry_readers.lock();
        let reader = readers.entry(name.to_owned()).or_insert_with(|| {
            Arc::new(Mutex::new(EntryReader::open(name, self.factory.create_delegate())))
        });
        Arc::clone(reader)
    }

    /// The stream reader called `name`, created on first use.
    pub fn stream_reader(&self, name: &str) -> Arc<Mutex<StreamReader>> {
        let mut readers = self.stream_readers.lock();
        let reader = readers.entry(name.to_owned()).or_insert_with(|| {
            Arc::new(Mutex::new(StreamReader::new(name, self.factory.create_delegate())))
        });
        Arc::clone(reader)
    }

    /// Control confirming and redelivering this journal's dispatchables.
    pub fn dispatcher_control(&self) -> Option<Arc<DispatcherControl>> {
        self.outbox.as_ref().map(|outbox| Arc::clone(outbox.control()))
    }

    /// Start the periodic redelivery sweep. `None` without a dispatcher.
    pub fn start_dispatcher_control(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        self.dispatcher_control().map(|control| control.spawn(cancel))
    }

    /// Release the journal's connection. The next append reacquires one.
    pub fn close(&self) {
        self.delegate.lock().close();
    }

    #[instrument(skip(self, entries, snapshot, shape), fields(count = entries.len()))]
    fn append_batch(
        &self,
        stream_name: &str,
        from_version: i64,
        entries: Vec<Entry>,
        snapshot: Option<State>,
        shape: Shape,
    ) -> Result<Vec<Entry>> {
        validate(stream_name, from_version, &entries)?;

        let (entries, dispatchable) = {
            let mut delegate = self.delegate.lock();
            delegate.ensure_connection()?;
            transactionally(&mut **delegate, |d| {
                let mut entries = entries;
                for (offset, entry) in (0_i64..).zip(entries.iter_mut()) {
                    let id = d.append_stream_entry(stream_name, from_version + offset, entry)?;
                    let _ = entry.assign_id(id.to_string());
                }
                if let Some(snapshot) = &snapshot {
                    d.append_snapshot(stream_name, snapshot)?;
                }
                let dispatchable = match &self.outbox {
                    Some(outbox) => {
                        let dispatchable = Dispatchable::new(snapshot.clone(), entries.clone());
                        outbox.record(d, &dispatchable)?;
                        Some(dispatchable)
                    }
                    None => None,
                };
                Ok((entries, dispatchable))
            })?
        };
        debug!(stream = stream_name, from_version, "entries appended");

        match (shape, &snapshot, entries.as_slice()) {
            (Shape::Single, None, [entry]) => self.listener.appended(entry),
            (Shape::Single, Some(snapshot), [entry]) => self.listener.appended_with(entry, snapshot),
            (_, None, all) => self.listener.appended_all(all),
            (_, Some(snapshot), all) => self.listener.appended_all_with(all, snapshot),
        }

        if let (Some(outbox), Some(dispatchable)) = (&self.outbox, dispatchable) {
            outbox.dispatch(dispatchable);
        }
        Ok(entries)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("dispatching", &self.outbox.is_some())
            .finish_non_exhaustive()
    }
}

fn validate(stream_name: &str, from_version: i64, entries: &[Entry]) -> Result<()> {
    if stream_name.is_empty() {
        return Err(StorageError::Invalid("stream name must not be empty".into()));
    }
    if from_version < 1 {
        return Err(StorageError::Invalid(format!(
            "stream version must be at least 1, got {from_version}"
        )));
    }
    if entries.is_empty() {
        return Err(StorageError::Invalid("nothing to append".into()));
    }
    let last_version = i64::try_from(entries.len() - 1)
        .ok()
        .and_then(|offset| from_version.checked_add(offset));
    if last_version.is_none() {
        return Err(StorageError::Invalid(format!(
            "{} entries from version {from_version} overflow the stream version",
            entries.len()
        )));
    }
    if let Some(id) = entries.iter().find_map(Entry::id) {
        return Err(StorageError::Invalid(format!("entry {id} was already appended")));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
