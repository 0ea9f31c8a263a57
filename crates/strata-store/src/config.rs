//! Immutable engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use strata_settings::StrataSettings;

use crate::pool::PoolConfig;

/// Everything a backend and its stores need, fixed at construction.
///
/// Every delegate built from one backend shares the same `Configuration`;
/// deriving a variant (another database file, another originator) yields a
/// new value rather than mutating a shared one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Configuration {
    /// `SQLite` database file.
    pub database_path: PathBuf,
    /// How long a connection waits on a locked database.
    pub busy_timeout: Duration,
    /// Create per-namespace state tables on first use.
    pub create_tables: bool,
    /// Lease pool bounds.
    pub pool: PoolConfig,
    /// Scopes which outbox rows this process writes and sweeps.
    pub originator_id: String,
    /// Period of the redelivery sweep.
    pub check_interval: Duration,
    /// Age after which an unconfirmed dispatchable is redelivered.
    pub confirmation_expiration: Duration,
    /// Longest a transaction may stay open before commit is refused.
    pub transaction_timeout: Duration,
}

impl Configuration {
    /// Derive the configuration from loaded settings.
    pub fn from_settings(settings: &StrataSettings) -> Self {
        Self {
            database_path: settings.database.path.clone(),
            busy_timeout: Duration::from_millis(settings.database.busy_timeout_ms),
            create_tables: settings.database.create_tables,
            pool: PoolConfig {
                connection_limit: settings.pool.connection_limit,
                liveness_timeout: Duration::from_millis(settings.pool.liveness_timeout_ms),
            },
            originator_id: settings.dispatch.originator_id.clone(),
            check_interval: Duration::from_millis(settings.dispatch.check_interval_ms),
            confirmation_expiration: Duration::from_millis(
                settings.dispatch.confirmation_expiration_ms,
            ),
            transaction_timeout: Duration::from_millis(settings.transaction_timeout_ms),
        }
    }

    /// Process startup from the global settings.
    ///
    /// Installs the stderr subscriber at the configured `log_level` and
    /// derives the configuration. Seed the global with
    /// [`strata_settings::init_settings`] first to skip loading from disk.
    pub fn bootstrap() -> Self {
        let settings = strata_settings::get_settings();
        strata_core::logging::init_subscriber(&settings.log_level);
        Self::from_settings(settings)
    }

    /// Same options against another database file.
    #[must_use]
    pub fn with_path(&self, path: impl AsRef<Path>) -> Self {
        Self {
            database_path: path.as_ref().to_path_buf(),
            ..self.clone()
        }
    }

    /// Same options under another outbox originator.
    #[must_use]
    pub fn with_originator(&self, originator_id: impl Into<String>) -> Self {
        Self {
            originator_id: originator_id.into(),
            ..self.clone()
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::from_settings(&StrataSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_settings() {
        let config = Configuration::default();
        assert_eq!(config.pool.connection_limit, 10);
        assert_eq!(config.pool.liveness_timeout, Duration::from_millis(100));
        assert_eq!(config.busy_timeout, Duration::from_secs(30));
        assert_eq!(config.transaction_timeout, Duration::from_secs(300));
        assert_eq!(config.check_interval, Duration::from_secs(1));
        assert_eq!(config.confirmation_expiration, Duration::from_secs(1));
        assert_eq!(config.originator_id, "strata");
        assert!(config.create_tables);
    }

    #[test]
    fn derived_configs_leave_original_untouched() {
        let base = Configuration::default();
        let other = base.with_path("/tmp/other.db").with_originator("billing");
        assert_eq!(other.database_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(other.originator_id, "billing");
        assert_eq!(base.originator_id, "strata");
        assert_eq!(other.pool, base.pool);
    }

    #[test]
    fn bootstrap_reads_global_settings() {
        let mut seeded = StrataSettings::default();
        seeded.log_level = "debug".into();
        seeded.dispatch.originator_id = "bootstrapped".into();
        let _ = strata_settings::init_settings(seeded);

        let config = Configuration::bootstrap();
        assert_eq!(config, Configuration::from_settings(strata_settings::get_settings()));
        assert_eq!(config.originator_id, strata_settings::get_settings().dispatch.originator_id);
    }

    #[test]
    fn settings_overrides_carry_through() {
        let mut settings = StrataSettings::default();
        settings.pool.connection_limit = 2;
        settings.dispatch.confirmation_expiration_ms = 250;
        let config = Configuration::from_settings(&settings);
        assert_eq!(config.pool.connection_limit, 2);
        assert_eq!(config.confirmation_expiration, Duration::from_millis(250));
    }
}
