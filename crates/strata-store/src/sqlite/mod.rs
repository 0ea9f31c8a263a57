//! `SQLite` backend.
//!
//! - **[`connection`]**: connection manager with pragmas, and [`SqliteBackend`],
//!   the [`DelegateFactory`](crate::DelegateFactory) every store is built from.
//! - **[`delegate`]**: [`SqliteStorageDelegate`], one leased connection per
//!   delegate with explicit transaction control.
//! - **[`migrations`]**: version-tracked embedded schema.

pub mod connection;
pub mod delegate;
pub mod migrations;

pub use connection::{PragmaState, SqliteBackend, SqlitePool, connection_manager, verify_pragmas};
pub use delegate::SqliteStorageDelegate;
pub use migrations::{current_version, latest_version, run_migrations};
