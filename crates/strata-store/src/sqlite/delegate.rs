//! `SQLite` implementation of [`StorageDelegate`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSqlOutput, Type, ValueRef};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use strata_core::{Dispatchable, Entry, Metadata, Payload, State};
use tracing::{debug, warn};

use super::connection::SqlitePool;
use crate::config::Configuration;
use crate::delegate::{StorageDelegate, StreamEntry};
use crate::errors::{Result, StorageError};
use crate::pool::Lease;

const ENTRY_COLUMNS: &str = "id, entry_type, type_version, data, metadata";

/// Delegate holding at most one leased connection.
///
/// The lease is taken on first use and kept until [`close`] (or drop), so a
/// transaction spans calls on the same connection.
///
/// [`close`]: StorageDelegate::close
pub struct SqliteStorageDelegate {
    pool: Arc<SqlitePool>,
    config: Arc<Configuration>,
    lease: Option<Lease<Connection>>,
    transaction_started: Option<Instant>,
    known_tables: HashSet<String>,
}

impl SqliteStorageDelegate {
    /// Delegate over `pool`; no connection is leased until first use.
    pub fn new(pool: Arc<SqlitePool>, config: Arc<Configuration>) -> Self {
        Self {
            pool,
            config,
            lease: None,
            transaction_started: None,
            known_tables: HashSet::new(),
        }
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.transaction_started.is_some()
    }

    fn conn(&mut self) -> Result<&Connection> {
        let lease = match self.lease.take() {
            Some(lease) => lease,
            None => self.pool.acquire()?,
        };
        let lease = self.lease.insert(lease);
        Ok(&**lease)
    }

    fn state_table(&mut self, namespace: &str) -> Result<String> {
        if namespace.is_empty()
            || !namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(StorageError::Invalid(format!(
                "namespace {namespace:?} must be non-empty ASCII alphanumerics or '_'"
            )));
        }
        let table = format!("tbl_{namespace}");
        if self.config.create_tables && !self.known_tables.contains(&table) {
            self.conn()?.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                   id           TEXT    PRIMARY KEY,
                   state_type   TEXT    NOT NULL,
                   type_version INTEGER NOT NULL,
                   data         BLOB    NOT NULL,
                   data_version INTEGER NOT NULL,
                   metadata     TEXT    NOT NULL
                 );"
            ))?;
            debug!(table, "state table ready");
            let _ = self.known_tables.insert(table.clone());
        }
        Ok(table)
    }

    fn insert_entry(
        &mut self,
        position: Option<(&str, i64)>,
        entry: &Entry,
    ) -> Result<i64> {
        let metadata = serde_json::to_string(entry.metadata())?;
        let (stream_name, stream_version) = position.unzip();
        let conn = self.conn()?;
        let _ = conn.execute(
            "INSERT INTO journal_entries
               (stream_name, stream_version, entry_type, type_version, data, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                stream_name,
                stream_version,
                entry.entry_type(),
                entry.type_version(),
                payload_value(entry.data()),
                metadata,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

impl StorageDelegate for SqliteStorageDelegate {
    fn ensure_connection(&mut self) -> Result<()> {
        if let Some(lease) = self.lease.take() {
            if self.transaction_started.is_some()
                || is_live(&lease, self.config.pool.liveness_timeout)
            {
                self.lease = Some(lease);
                return Ok(());
            }
            warn!("held connection went stale, reopening");
            self.pool.discard(lease);
            self.known_tables.clear();
        }
        self.lease = Some(self.pool.acquire()?);
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.conn()?.execute_batch("BEGIN IMMEDIATE")?;
        self.transaction_started = Some(Instant::now());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn()?.execute_batch("COMMIT")?;
        self.transaction_started = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.transaction_started = None;
        match self.lease.as_deref() {
            Some(conn) if !conn.is_autocommit() => {
                conn.execute_batch("ROLLBACK")?;
                // Tables created inside the rolled back transaction are gone.
                self.known_tables.clear();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn timeout_check(&mut self) -> Result<()> {
        match self.transaction_started {
            Some(started) if started.elapsed() > self.config.transaction_timeout => Err(
                StorageError::TransactionTimeout(self.config.transaction_timeout),
            ),
            _ => Ok(()),
        }
    }

    fn write_state(&mut self, namespace: &str, state: &State) -> Result<()> {
        let table = self.state_table(namespace)?;
        let metadata = serde_json::to_string(&state.metadata)?;
        let _ = self.conn()?.execute(
            &format!(
                "INSERT INTO {table} (id, state_type, type_version, data, data_version, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                   state_type = excluded.state_type,
                   type_version = excluded.type_version,
                   data = excluded.data,
                   data_version = excluded.data_version,
                   metadata = excluded.metadata"
            ),
            params![
                state.id,
                state.state_type,
                state.type_version,
                payload_value(&state.data),
                state.data_version,
                metadata,
            ],
        )?;
        Ok(())
    }

    fn read_state(&mut self, namespace: &str, id: &str) -> Result<Option<State>> {
        let table = self.state_table(namespace)?;
        let state = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT id, state_type, type_version, data, data_version, metadata
                     FROM {table} WHERE id = ?1"
                ),
                params![id],
                map_state,
            )
            .optional()?;
        Ok(state)
    }

    fn append_entry(&mut self, entry: &Entry) -> Result<i64> {
        self.insert_entry(None, entry)
    }

    fn append_stream_entry(
        &mut self,
        stream_name: &str,
        stream_version: i64,
        entry: &Entry,
    ) -> Result<i64> {
        self.insert_entry(Some((stream_name, stream_version)), entry)
            .map_err(|err| match err {
                StorageError::Sqlite(rusqlite::Error::SqliteFailure(code, _))
                    if code.code == ErrorCode::ConstraintViolation =>
                {
                    StorageError::ConcurrencyViolation(format!(
                        "{stream_name} version {stream_version} already appended"
                    ))
                }
                other => other,
            })
    }

    fn append_snapshot(&mut self, stream_name: &str, snapshot: &State) -> Result<()> {
        let metadata = serde_json::to_string(&snapshot.metadata)?;
        let _ = self.conn()?.execute(
            "INSERT OR REPLACE INTO journal_snapshots
               (stream_name, snapshot_type, type_version, data, data_version, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                stream_name,
                snapshot.state_type,
                snapshot.type_version,
                payload_value(&snapshot.data),
                snapshot.data_version,
                metadata,
            ],
        )?;
        Ok(())
    }

    fn latest_snapshot(&mut self, stream_name: &str) -> Result<Option<State>> {
        let snapshot = self
            .conn()?
            .query_row(
                "SELECT stream_name, snapshot_type, type_version, data, data_version, metadata
                 FROM journal_snapshots WHERE stream_name = ?1
                 ORDER BY data_version DESC LIMIT 1",
                params![stream_name],
                map_state,
            )
            .optional()?;
        Ok(snapshot)
    }

    fn read_stream(&mut self, stream_name: &str, from_version: i64) -> Result<Vec<StreamEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS}, stream_version FROM journal_entries
             WHERE stream_name = ?1 AND stream_version >= ?2
             ORDER BY stream_version ASC"
        ))?;
        let rows = stmt
            .query_map(params![stream_name, from_version], |row| {
                Ok(StreamEntry {
                    stream_version: row.get(5)?,
                    entry: map_entry(row)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn read_entries(&mut self, from_id: i64, limit: usize) -> Result<Vec<Entry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries
             WHERE id >= ?1 ORDER BY id ASC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![from_id, limit], map_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn entry_count(&mut self) -> Result<i64> {
        Ok(self
            .conn()?
            .query_row("SELECT COUNT(*) FROM journal_entries", [], |row| row.get(0))?)
    }

    fn last_entry_id(&mut self) -> Result<i64> {
        Ok(self.conn()?.query_row(
            "SELECT COALESCE(MAX(id), 0) FROM journal_entries",
            [],
            |row| row.get(0),
        )?)
    }

    fn read_offset(&mut self, reader_name: &str) -> Result<Option<i64>> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT reader_offset FROM reader_offsets WHERE reader_name = ?1",
                params![reader_name],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn write_offset(&mut self, reader_name: &str, offset: i64) -> Result<()> {
        let _ = self.conn()?.execute(
            "INSERT INTO reader_offsets (reader_name, reader_offset) VALUES (?1, ?2)
             ON CONFLICT(reader_name) DO UPDATE SET reader_offset = excluded.reader_offset",
            params![reader_name, offset],
        )?;
        Ok(())
    }

    fn append_dispatchable(&mut self, originator_id: &str, dispatchable: &Dispatchable) -> Result<()> {
        let entry_ids = dispatchable
            .entries
            .iter()
            .map(|entry| {
                entry.sequence().ok_or_else(|| {
                    StorageError::Invalid(format!(
                        "dispatchable {} carries an entry without an id",
                        dispatchable.id
                    ))
                })
            })
            .collect::<Result<Vec<i64>>>()?;
        let entry_ids = serde_json::to_string(&entry_ids)?;

        let state = dispatchable.state.as_ref();
        let state_metadata = state
            .map(|s| serde_json::to_string(&s.metadata))
            .transpose()?;

        let _ = self.conn()?.execute(
            "INSERT INTO dispatchables
               (id, originator_id, created_on, state_id, state_type, state_type_version,
                state_data, state_data_version, state_metadata, entry_ids)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                dispatchable.id,
                originator_id,
                dispatchable.created_on.timestamp_millis(),
                state.map(|s| s.id.as_str()),
                state.map(|s| s.state_type.as_str()),
                state.map(|s| s.type_version),
                state.map(|s| payload_value(&s.data)),
                state.map(|s| s.data_version),
                state_metadata,
                entry_ids,
            ],
        )?;
        Ok(())
    }

    fn delete_dispatchable(&mut self, id: &str) -> Result<()> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM dispatchables WHERE id = ?1", params![id])?;
        if deleted == 0 {
            debug!(dispatch_id = id, "dispatchable already confirmed");
        }
        Ok(())
    }

    fn query_unconfirmed_dispatchables(&mut self, originator_id: &str) -> Result<Vec<Dispatchable>> {
        let conn = self.conn()?;
        let rows = {
            let mut stmt = conn.prepare(
                "SELECT id, created_on, state_id, state_type, state_type_version,
                        state_data, state_data_version, state_metadata, entry_ids
                 FROM dispatchables WHERE originator_id = ?1
                 ORDER BY created_on ASC, id ASC",
            )?;
            stmt.query_map(params![originator_id], map_dispatchable_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };

        let mut lookup = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE id = ?1"
        ))?;
        let mut dispatchables = Vec::with_capacity(rows.len());
        for row in rows {
            let ids: Vec<i64> = serde_json::from_str(&row.entry_ids)?;
            let mut entries = Vec::with_capacity(ids.len());
            for id in ids {
                match lookup.query_row(params![id], map_entry).optional()? {
                    Some(entry) => entries.push(entry),
                    None => warn!(dispatch_id = %row.id, entry_id = id, "dispatchable references a missing entry"),
                }
            }
            let created_on = DateTime::from_timestamp_millis(row.created_on).ok_or_else(|| {
                StorageError::Invalid(format!("dispatchable {} has a bad timestamp", row.id))
            })?;
            dispatchables.push(Dispatchable::with(row.id, created_on, row.state, entries));
        }
        Ok(dispatchables)
    }

    fn close(&mut self) {
        if let Err(err) = self.rollback() {
            warn!(error = %err, "rollback on close failed");
        }
        if let Some(lease) = self.lease.take() {
            self.pool.release(lease);
        }
    }
}

impl Drop for SqliteStorageDelegate {
    fn drop(&mut self) {
        self.close();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

struct DispatchableRow {
    id: String,
    created_on: i64,
    state: Option<State>,
    entry_ids: String,
}

/// A held connection is live if it answers within `timeout`.
fn is_live(conn: &Connection, timeout: Duration) -> bool {
    let started = Instant::now();
    let answered = conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok();
    answered && started.elapsed() < timeout
}

fn payload_value(payload: &Payload) -> ToSqlOutput<'_> {
    match payload {
        Payload::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
        Payload::Binary(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
    }
}

fn payload_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Payload> {
    match row.get_ref(idx)? {
        ValueRef::Text(text) => String::from_utf8(text.to_vec())
            .map(Payload::Text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        ValueRef::Blob(bytes) => Ok(Payload::Binary(bytes.to_vec())),
        ValueRef::Null => Ok(Payload::default()),
        other => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "data".to_owned(),
            other.data_type(),
        )),
    }
}

fn metadata_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Metadata> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let id: i64 = row.get(0)?;
    Ok(Entry::persisted(
        id.to_string(),
        row.get::<_, String>(1)?,
        row.get(2)?,
        payload_column(row, 3)?,
        metadata_column(row, 4)?,
    ))
}

fn map_state(row: &Row<'_>) -> rusqlite::Result<State> {
    Ok(State {
        id: row.get(0)?,
        state_type: row.get(1)?,
        type_version: row.get(2)?,
        data: payload_column(row, 3)?,
        data_version: row.get(4)?,
        metadata: metadata_column(row, 5)?,
    })
}

fn map_dispatchable_row(row: &Row<'_>) -> rusqlite::Result<DispatchableRow> {
    let state_id: Option<String> = row.get(2)?;
    let state = match state_id {
        Some(id) => Some(State {
            id,
            state_type: row.get(3)?,
            type_version: row.get(4)?,
            data: payload_column(row, 5)?,
            data_version: row.get(6)?,
            metadata: metadata_column(row, 7)?,
        }),
        None => None,
    };
    Ok(DispatchableRow {
        id: row.get(0)?,
        created_on: row.get(1)?,
        state,
        entry_ids: row.get(8)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
