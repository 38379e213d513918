//! The message channel between connected peers.
//!
//! Sync is best effort. Nothing here returns an error: failed sends are
//! logged and dropped, undecodable frames are ignored.

use std::sync::Arc;

use bytes::Bytes;
use pagesync_core::{decode_message, encode_message, PeerHandle, PeerId, StateMessage};
use pagesync_net::{ConnectionState, TransportBackend};
use tracing::{debug, info, warn};

use crate::peers::PeerSet;

/// What became of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the backend for this many peers.
    Sent(usize),
    /// Nobody to send to; skipped.
    NoPeers,
    /// Encoding or the backend failed; dropped.
    Failed,
}

/// Effect of a connection state change on the peer set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerChange {
    Added(PeerHandle),
    Removed(PeerHandle),
    Unchanged,
}

/// Wraps a transport backend and owns the confirmed peer set.
pub struct SessionTransport {
    backend: Arc<dyn TransportBackend>,
    peers: PeerSet,
}

impl SessionTransport {
    pub fn new(backend: Arc<dyn TransportBackend>) -> Self {
        Self {
            backend,
            peers: PeerSet::new(),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        self.backend.local_peer()
    }

    /// Peers with a confirmed connection.
    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    /// Live connections as the backend sees them.
    pub async fn connected_peers(&self) -> Vec<PeerHandle> {
        self.backend.connected_peers().await
    }

    /// Send to every confirmed peer.
    pub async fn broadcast(&self, message: &StateMessage) -> SendOutcome {
        self.send(message, &self.peers.to_vec()).await
    }

    /// Send to `to`.
    pub async fn send(&self, message: &StateMessage, to: &[PeerHandle]) -> SendOutcome {
        if to.is_empty() {
            debug!(value = message.value, "no peers, send skipped");
            return SendOutcome::NoPeers;
        }

        let bytes = match encode_message(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "encoding failed, message dropped");
                return SendOutcome::Failed;
            }
        };

        match self.backend.send(bytes, to).await {
            Ok(()) => {
                debug!(
                    value = message.value,
                    kind = ?message.kind,
                    peers = to.len(),
                    "sent"
                );
                SendOutcome::Sent(to.len())
            }
            Err(e) => {
                warn!(error = %e, "send failed, message dropped");
                SendOutcome::Failed
            }
        }
    }

    /// Apply a connection state change to the peer set.
    pub fn on_state_change(&mut self, peer: PeerHandle, state: ConnectionState) -> PeerChange {
        match state {
            ConnectionState::Connecting => {
                debug!(peer = %peer, "connecting");
                PeerChange::Unchanged
            }
            ConnectionState::Connected => {
                if self.peers.insert(peer.clone()) {
                    info!(peer = %peer, peers = self.peers.len(), "connected");
                    PeerChange::Added(peer)
                } else {
                    PeerChange::Unchanged
                }
            }
            ConnectionState::NotConnected => {
                if self.peers.remove(&peer) {
                    info!(peer = %peer, peers = self.peers.len(), "disconnected");
                    PeerChange::Removed(peer)
                } else {
                    PeerChange::Unchanged
                }
            }
        }
    }

    /// Decode a frame. Foreign or malformed data yields `None`.
    pub fn on_receive(&self, bytes: &Bytes, from: &PeerHandle) -> Option<StateMessage> {
        match decode_message(bytes) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(peer = %from, error = %e, "undecodable frame dropped");
                None
            }
        }
    }

    /// Close every connection. The peer set is cleared at once; returns
    /// whether it changed.
    pub async fn disconnect_all(&mut self) -> bool {
        self.backend.disconnect_all().await;
        self.peers.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagesync_core::Timestamp;
    use pagesync_net::MemoryNetwork;

    fn peer(id: u64) -> PeerHandle {
        PeerHandle::new(id, PeerId::new("remote"))
    }

    async fn transport() -> SessionTransport {
        let network = MemoryNetwork::new();
        let (_, parts) = network.join(PeerId::new("local")).await;
        SessionTransport::new(parts.transport)
    }

    #[tokio::test]
    async fn test_state_changes_drive_peer_set() {
        let mut transport = transport().await;

        assert_eq!(
            transport.on_state_change(peer(1), ConnectionState::Connecting),
            PeerChange::Unchanged
        );
        assert!(transport.peers().is_empty());

        assert_eq!(
            transport.on_state_change(peer(1), ConnectionState::Connected),
            PeerChange::Added(peer(1))
        );
        assert_eq!(
            transport.on_state_change(peer(1), ConnectionState::Connected),
            PeerChange::Unchanged
        );
        assert_eq!(transport.peers().len(), 1);

        assert_eq!(
            transport.on_state_change(peer(1), ConnectionState::NotConnected),
            PeerChange::Removed(peer(1))
        );
        assert_eq!(
            transport.on_state_change(peer(1), ConnectionState::NotConnected),
            PeerChange::Unchanged
        );
    }

    #[tokio::test]
    async fn test_send_without_peers_skipped() {
        let transport = transport().await;
        let message = StateMessage::state_change(3, Timestamp::from_millis(1));
        assert_eq!(transport.broadcast(&message).await, SendOutcome::NoPeers);
    }

    #[tokio::test]
    async fn test_backend_error_absorbed() {
        let mut transport = transport().await;
        // Known to the peer set, unknown to the backend.
        transport.on_state_change(peer(77), ConnectionState::Connected);

        let message = StateMessage::state_change(3, Timestamp::from_millis(1));
        assert_eq!(transport.broadcast(&message).await, SendOutcome::Failed);
    }

    #[tokio::test]
    async fn test_receive_decodes_or_drops() {
        let transport = transport().await;
        let message = StateMessage::connection_sync(5, Timestamp::from_millis(10));
        let bytes = encode_message(&message).unwrap();

        assert_eq!(transport.on_receive(&bytes, &peer(1)), Some(message));
        assert_eq!(
            transport.on_receive(&Bytes::from_static(b"\xff\x00garbage"), &peer(1)),
            None
        );
    }

    #[tokio::test]
    async fn test_disconnect_all_clears_locally() {
        let mut transport = transport().await;
        assert!(!transport.disconnect_all().await);

        transport.on_state_change(peer(1), ConnectionState::Connected);
        assert!(transport.disconnect_all().await);
        assert!(transport.peers().is_empty());
    }
}
