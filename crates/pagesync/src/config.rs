//! Session configuration.

use std::time::Duration;

use pagesync_core::ConfigError;
use pagesync_net::DEFAULT_INVITE_TIMEOUT;
use serde::{Deserialize, Serialize};

/// Configuration for a sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Bound on each invitation.
    #[serde(with = "pagesync_core::duration")]
    pub invite_timeout: Duration,
    /// Pause before the single retry of a failed advertise or browse.
    #[serde(with = "pagesync_core::duration")]
    pub retry_delay: Duration,
    /// Display name on the network. Defaults to the device name.
    pub peer_name: Option<String>,
    /// Pages in the hosted document. Advertised, and the bound for
    /// adopted values.
    pub page_count: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            invite_timeout: DEFAULT_INVITE_TIMEOUT,
            retry_delay: Duration::ZERO,
            peer_name: None,
            page_count: 1,
        }
    }
}

impl SyncConfig {
    /// Check the configuration before a session is built from it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.invite_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "invite_timeout must be non-zero".into(),
            ));
        }
        if self.page_count == 0 {
            return Err(ConfigError::InvalidConfig(
                "page_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
