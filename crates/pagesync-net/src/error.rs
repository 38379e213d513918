//! Error types for network backends.

use thiserror::Error;

/// Errors reported by discovery and transport backends.
///
/// All of these are transient: the session logs them and keeps running.
#[derive(Debug, Error)]
pub enum NetError {
    /// Advertising could not start.
    #[error("advertise failed: {0}")]
    AdvertiseFailed(String),

    /// Browsing could not start.
    #[error("browse failed: {0}")]
    BrowseFailed(String),

    /// Invitation was not answered in time.
    #[error("invitation to {0} timed out")]
    InviteTimeout(String),

    /// Invitation could not be delivered.
    #[error("invitation failed: {0}")]
    InviteFailed(String),

    /// A frame could not be handed to the link.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The peer handle does not name a live connection.
    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    /// Handshake or beacon encoding problem.
    #[error("codec error: {0}")]
    Codec(String),

    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend has shut down.
    #[error("backend closed")]
    Closed,
}

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, NetError>;
