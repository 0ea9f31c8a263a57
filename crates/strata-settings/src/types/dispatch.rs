use serde::{Deserialize, Serialize};

/// Outbox dispatch and redelivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    /// Scopes which outbox rows this process sweeps.
    pub originator_id: String,
    /// Period of the redelivery sweep.
    pub check_interval_ms: u64,
    /// Age after which an unconfirmed dispatchable is redelivered.
    pub confirmation_expiration_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            originator_id: "strata".to_string(),
            check_interval_ms: 1000,
            confirmation_expiration_ms: 1000,
        }
    }
}
