//! Store configuration.

use serde::{Deserialize, Serialize};

use crate::error::{RosterError, RosterResult};
use crate::storage::DEFAULT_APPLY_ATTEMPTS;

/// Configuration shared by the store handle, the query engine and the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Compare-and-swap attempts for one `apply` before a conflict surfaces.
    pub max_apply_retries: u32,
    /// Result limit used when a query does not name one.
    pub default_query_limit: usize,
    /// Whether the journal fsyncs after every record (slower but safer).
    pub sync_on_write: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_apply_retries: DEFAULT_APPLY_ATTEMPTS,
            default_query_limit: 5,
            sync_on_write: true,
        }
    }
}

impl StoreConfig {
    const MAX_APPLY_RETRIES: u32 = 64;

    /// Check bounds, returning the config unchanged when valid.
    ///
    /// # Errors
    /// `Config` when `max_apply_retries` is outside `1..=64` or the default limit is zero.
    pub fn validate(self) -> RosterResult<Self> {
        if self.max_apply_retries == 0 || self.max_apply_retries > Self::MAX_APPLY_RETRIES {
            return Err(RosterError::config(format!(
                "max_apply_retries must be within 1..={} (got {})",
                Self::MAX_APPLY_RETRIES,
                self.max_apply_retries
            )));
        }

        if self.default_query_limit == 0 {
            return Err(RosterError::config("default_query_limit must be positive"));
        }

        Ok(self)
    }
}
