//! `SQLite` connections and the backend that hands out delegates.
//!
//! Connections come from an `r2d2_sqlite` manager whose init hook applies
//! WAL mode, the busy timeout, foreign keys and `synchronous = NORMAL` to
//! every new connection. The manager sits behind a [`LeasePool`] rather
//! than an `r2d2::Pool` so exhaustion fails fast.

use std::sync::Arc;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::info;

use super::delegate::SqliteStorageDelegate;
use super::migrations::run_migrations;
use crate::config::Configuration;
use crate::delegate::{DelegateFactory, StorageDelegate};
use crate::errors::{Result, StorageError};
use crate::pool::LeasePool;

/// Lease pool over `SQLite` connections.
pub type SqlitePool = LeasePool<SqliteConnectionManager>;

/// Build a connection manager for the configured file with pragmas applied
/// on every connect.
pub fn connection_manager(config: &Configuration) -> SqliteConnectionManager {
    let busy_timeout_ms = config.busy_timeout.as_millis();
    SqliteConnectionManager::file(&config.database_path).with_init(move |conn| {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {busy_timeout_ms};\
             PRAGMA foreign_keys = ON;\
             PRAGMA synchronous = NORMAL;"
        ))
    })
}

/// Pragma state for verification.
#[derive(Debug)]
pub struct PragmaState {
    /// Journal mode (should be "wal").
    pub journal_mode: String,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: i64,
}

/// Read back the pragmas the init hook sets.
pub fn verify_pragmas(conn: &Connection) -> Result<PragmaState> {
    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    let busy_timeout_ms: i64 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0))?;
    Ok(PragmaState {
        journal_mode,
        busy_timeout_ms,
    })
}

/// A migrated `SQLite` database plus the pool every delegate leases from.
#[derive(Clone, Debug)]
pub struct SqliteBackend {
    pool: Arc<SqlitePool>,
    config: Arc<Configuration>,
}

impl SqliteBackend {
    /// Open (or create) the database and bring its schema up to date.
    ///
    /// Fails if no connection can be opened at all.
    pub fn open(config: Configuration) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Migration {
                    message: format!("failed to create {}: {e}", parent.display()),
                })?;
            }
        }

        let pool = LeasePool::new(connection_manager(&config), config.pool)?;
        let lease = pool.acquire()?;
        let migrated = run_migrations(&lease);
        pool.release(lease);
        let applied = migrated?;

        info!(
            path = %config.database_path.display(),
            applied,
            limit = config.pool.connection_limit,
            "sqlite backend ready"
        );
        Ok(Self {
            pool: Arc::new(pool),
            config: Arc::new(config),
        })
    }

    /// A concrete delegate, for callers that want the `SQLite` type itself.
    pub fn sqlite_delegate(&self) -> SqliteStorageDelegate {
        SqliteStorageDelegate::new(Arc::clone(&self.pool), Arc::clone(&self.config))
    }

    /// The shared lease pool.
    pub fn pool(&self) -> &Arc<SqlitePool> {
        &self.pool
    }
}

impl DelegateFactory for SqliteBackend {
    fn create_delegate(&self) -> Box<dyn StorageDelegate> {
        Box::new(self.sqlite_delegate())
    }

    fn configuration(&self) -> &Configuration {
        &self.config
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
