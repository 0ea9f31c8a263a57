//! # strata-store
//!
//! Event-sourced storage over a pooled `SQLite` backend.
//!
//! - **[`pool`]**: non-blocking connection lease pool with liveness checks
//! - **[`delegate`]**: the [`StorageDelegate`] seam every component drives,
//!   plus the [`transactionally`] helper
//! - **[`sqlite`]**: the `SQLite` delegate, schema migrations and [`SqliteBackend`]
//! - **[`journal`]**: stream appends with optional snapshots
//! - **[`reader`]**: named, resumable [`EntryReader`] cursors over the log
//! - **[`stream`]**: snapshot-plus-entries [`StreamReader`]
//! - **[`state`]**: versioned [`StateStore`] writing state and source entries atomically
//! - **[`dispatch`]**: transactional outbox with confirmation and redelivery

#![deny(unsafe_code)]

pub mod config;
pub mod delegate;
pub mod dispatch;
pub mod errors;
pub mod journal;
pub mod pool;
pub mod reader;
pub mod sqlite;
pub mod state;
pub mod stream;

pub use config::Configuration;
pub use delegate::{DelegateFactory, StorageDelegate, StreamEntry, transactionally};
pub use dispatch::{ConfirmDispatched, Dispatcher, DispatcherControl};
pub use errors::{Result, StorageError};
pub use journal::{Journal, JournalListener, NoopListener};
pub use pool::{Lease, LeasePool, PoolConfig, PoolError};
pub use reader::EntryReader;
pub use sqlite::{SqliteBackend, SqliteStorageDelegate};
pub use state::{ReadOutcome, StateStore, StoreNames};
pub use stream::StreamReader;
