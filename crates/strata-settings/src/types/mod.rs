//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so partial JSON files deserialize with defaults for missing fields.

mod dispatch;
mod storage;

pub use dispatch::*;
pub use storage::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "database": { "path": "/var/lib/strata/journal.db" },
///   "pool": { "connectionLimit": 4 },
///   "dispatch": { "originatorId": "billing" }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrataSettings {
    /// Default `tracing` filter level.
    pub log_level: String,
    /// Database file and table options.
    pub database: DatabaseSettings,
    /// Connection lease pool.
    pub pool: PoolSettings,
    /// Outbox dispatch and redelivery.
    pub dispatch: DispatchSettings,
    /// Longest a transaction may stay open before commit is refused.
    pub transaction_timeout_ms: u64,
}

impl Default for StrataSettings {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            database: DatabaseSettings::default(),
            pool: PoolSettings::default(),
            dispatch: DispatchSettings::default(),
            transaction_timeout_ms: 300_000,
        }
    }
}

impl StrataSettings {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pool.connection_limit == 0 {
            return Err(SettingsError::InvalidValue(
                "pool.connectionLimit must be at least 1".into(),
            ));
        }
        if self.dispatch.originator_id.is_empty() {
            return Err(SettingsError::InvalidValue(
                "dispatch.originatorId must not be empty".into(),
            ));
        }
        if self.dispatch.check_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "dispatch.checkIntervalMs must be positive".into(),
            ));
        }
        if self.transaction_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "transactionTimeoutMs must be positive".into(),
            ));
        }
        Ok(())
    }
}
