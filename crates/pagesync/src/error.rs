//! Error types for the session layer.

use pagesync_core::ConfigError;
use pagesync_net::NetError;
use thiserror::Error;

/// Errors from building a sync session.
///
/// Once a session runs, nothing it does is surfaced as an error: transient
/// failures become log lines and status messages.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Invalid identity or configuration. Fatal.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The network backend could not be created.
    #[error("network error: {0}")]
    Net(#[from] NetError),
}

/// Result type for session construction.
pub type Result<T> = std::result::Result<T, SessionError>;
