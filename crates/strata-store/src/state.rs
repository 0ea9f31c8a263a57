//! Versioned key/value state with transactional source entries.
//!
//! A write upserts the state into its type's namespace, appends the source
//! entries that produced it, and records the outbox row, all in one
//! transaction. The stored `data_version` guards against stale writers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use strata_core::{Dispatchable, Entry, Metadata, State, Stateful};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::delegate::{DelegateFactory, StorageDelegate, transactionally};
use crate::dispatch::{Dispatcher, DispatcherControl, Outbox};
use crate::errors::{Result, StorageError};
use crate::reader::EntryReader;

/// Maps logical type names to storage namespaces.
#[derive(Clone, Debug, Default)]
pub struct StoreNames {
    namespaces: HashMap<String, String>,
}

impl StoreNames {
    /// No registrations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store values of `type_name` under `namespace`.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> &mut Self {
        let _ = self.namespaces.insert(type_name.into(), namespace.into());
        self
    }

    /// Store `S` under `namespace`.
    pub fn register_type<S: Stateful>(&mut self, namespace: impl Into<String>) -> &mut Self {
        self.register(S::TYPE_NAME, namespace)
    }

    /// Namespace registered for `type_name`.
    pub fn namespace_for(&self, type_name: &str) -> Option<&str> {
        self.namespaces.get(type_name).map(String::as_str)
    }

    fn resolve(&self, type_name: &str) -> Result<&str> {
        self.namespace_for(type_name)
            .ok_or_else(|| StorageError::NoTypeStore(type_name.to_owned()))
    }
}

/// A decoded state together with what was stored alongside it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadOutcome<S> {
    /// Entity id.
    pub id: String,
    /// Decoded value.
    pub state: S,
    /// Stored data version.
    pub version: i64,
    /// Metadata of the last write.
    pub metadata: Metadata,
}

/// Typed state store over one delegate.
pub struct StateStore {
    delegate: Mutex<Box<dyn StorageDelegate>>,
    factory: Arc<dyn DelegateFactory>,
    names: StoreNames,
    outbox: Option<Outbox>,
    entry_readers: Mutex<HashMap<String, Arc<Mutex<EntryReader>>>>,
}

impl StateStore {
    /// Store over `factory` resolving namespaces through `names`.
    ///
    /// Outbox rows are written under `<originator_id>.state`.
    pub fn new(
        factory: Arc<dyn DelegateFactory>,
        names: StoreNames,
        dispatcher: Option<Arc<dyn Dispatcher>>,
    ) -> Self {
        let originator_id = format!("{}.state", factory.configuration().originator_id);
        Self::for_originator(factory, names, dispatcher, originator_id)
    }

    /// Store whose outbox rows are written and swept under `originator_id`.
    pub fn for_originator(
        factory: Arc<dyn DelegateFactory>,
        names: StoreNames,
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
            names,
            outbox,
            entry_readers: Mutex::new(HashMap::new()),
        }
    }

    /// Namespace registrations.
    pub fn names(&self) -> &StoreNames {
        &self.names
    }

    /// Encode `state` and write it at `version`, appending `sources`.
    ///
    /// See [`write_raw`](Self::write_raw).
    pub fn write<S: Stateful>(
        &self,
        id: &str,
        state: &S,
        version: i64,
        sources: Vec<Entry>,
        metadata: Metadata,
    ) -> Result<Vec<Entry>> {
        if id.is_empty() {
            return Err(StorageError::Invalid("state id must not be empty".into()));
        }
        let raw = State::from_object(id, state, version, metadata)?;
        self.write_raw(raw, sources)
    }

    /// Write a raw state and append `sources` in one transaction.
    ///
    /// Sources without metadata inherit the state's. Returns the sources
    /// with their assigned ids. A stored version at or above the one being
    /// written fails with [`StorageError::ConcurrencyViolation`] and leaves
    /// storage untouched.
    #[instrument(skip_all, fields(id = %state.id, state_type = %state.state_type, version = state.data_version))]
    pub fn write_raw(&self, state: State, sources: Vec<Entry>) -> Result<Vec<Entry>> {
        if state.id.is_empty() {
            return Err(StorageError::Invalid("state id must not be empty".into()));
        }
        if state.state_type.is_empty() {
            return Err(StorageError::Invalid("state type must not be empty".into()));
        }
        if state.data_version < 1 {
            return Err(StorageError::Invalid(format!(
                "data version must be at least 1, got {}",
                state.data_version
            )));
        }
        let namespace = self.names.resolve(&state.state_type)?;
        if let Some(id) = sources.iter().find_map(Entry::id) {
            return Err(StorageError::Invalid(format!("source entry {id} was already appended")));
        }

        let sources: Vec<Entry> = sources
            .into_iter()
            .map(|source| source.or_metadata(&state.metadata))
            .collect();

        let (sources, dispatchable) = {
            let mut delegate = self.delegate.lock();
            delegate.ensure_connection()?;
            transactionally(&mut **delegate, |d| {
                let stored = d.read_state(namespace, &state.id)?;
                if let Some(stored) = stored.filter(|s| s.data_version >= state.data_version) {
                    return Err(StorageError::ConcurrencyViolation(format!(
                        "{} {} is at version {}, cannot write version {}",
                        state.state_type, state.id, stored.data_version, state.data_version
                    )));
                }
                d.write_state(namespace, &state)?;

                let mut sources = sources;
                for source in &mut sources {
                    let id = d.append_entry(source)?;
                    let _ = source.assign_id(id.to_string());
                }
                let dispatchable = match &self.outbox {
                    Some(outbox) => {
                        let dispatchable = Dispatchable::new(Some(state.clone()), sources.clone());
                        outbox.record(d, &dispatchable)?;
                        Some(dispatchable)
                    }
                    None => None,
                };
                Ok((sources, dispatchable))
            })?
        };
        debug!(namespace, sources = sources.len(), "state written");

        if let (Some(outbox), Some(dispatchable)) = (&self.outbox, dispatchable) {
            outbox.dispatch(dispatchable);
        }
        Ok(sources)
    }

    /// Read and decode the `S` stored under `id`.
    pub fn read<S: Stateful>(&self, id: &str) -> Result<ReadOutcome<S>> {
        let raw = self.read_raw(id, S::TYPE_NAME)?;
        let state = raw.to_object::<S>()?;
        Ok(ReadOutcome {
            id: raw.id,
            state,
            version: raw.data_version,
            metadata: raw.metadata,
        })
    }

    /// Read the raw state of `type_name` stored under `id`.
    ///
    /// A missing row fails with [`StorageError::NotFound`].
    pub fn read_raw(&self, id: &str, type_name: &str) -> Result<State> {
        if id.is_empty() {
            return Err(StorageError::Invalid("state id must not be empty".into()));
        }
        if type_name.is_empty() {
            return Err(StorageError::Invalid("state type must not be empty".into()));
        }
        let namespace = self.names.resolve(type_name)?;

        let mut delegate = self.delegate.lock();
        delegate.ensure_connection()?;
        transactionally(&mut **delegate, |d| d.read_state(namespace, id))?
            .ok_or_else(|| StorageError::NotFound(format!("{type_name} {id}")))
    }

    /// The entry reader called `name`, created on first use.
    pub fn entry_reader(&self, name: &str) -> Arc<Mutex<EntryReader>> {
        let mut readers = self.entry_readers.lock();
        let reader = readers.entry(name.to_owned()).or_insert_with(|| {
            Arc::new(Mutex::new(EntryReader::open(name, self.factory.create_delegate())))
        });
        Arc::clone(reader)
    }

    /// Control confirming and redelivering this store's dispatchables.
    pub fn dispatcher_control(&self) -> Option<Arc<DispatcherControl>> {
        self.outbox.as_ref().map(|outbox| Arc::clone(outbox.control()))
    }

    /// Start the periodic redelivery sweep. `None` without a dispatcher.
    pub fn start_dispatcher_control(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        self.dispatcher_control().map(|control| control.spawn(cancel))
    }

    /// Release the store's connection.
    pub fn close(&self) {
        self.delegate.lock().close();
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("names", &self.names)
            .field("dispatching", &self.outbox.is_some())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
