use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Database file and table options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// `SQLite` database file. Created if missing.
    pub path: PathBuf,
    /// How long a connection waits on a locked database.
    pub busy_timeout_ms: u64,
    /// Create per-namespace state tables on first use.
    pub create_tables: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: 30_000,
            create_tables: true,
        }
    }
}

fn default_database_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".strata").join("strata.db")
}

/// Connection lease pool sizing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolSettings {
    /// Maximum connections leased at once.
    pub connection_limit: usize,
    /// Upper bound on the validity check of an idle connection.
    pub liveness_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            connection_limit: 10,
            liveness_timeout_ms: 100,
        }
    }
}
