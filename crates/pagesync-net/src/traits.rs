//! Backend traits and the typed event stream.
//!
//! A backend is split in three parts matching the three roles of a node on
//! the network: advertising, browsing and moving bytes. Everything the
//! network reports back (connection changes, data, discovery) arrives on a
//! single ordered [`NetEvent`] channel, so the consumer has one place to
//! reason about ordering.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use pagesync_core::{DiscoveryPayload, InstanceId, PeerHandle, PeerId, ServiceDescriptor};

use crate::error::Result;

/// Default bound on how long an invitation may take.
pub const DEFAULT_INVITE_TIMEOUT: Duration = Duration::from_secs(30);

/// A peer seen by a browser but not necessarily connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub name: PeerId,
    pub instance: InstanceId,
    /// Where to dial, for backends that need an address.
    pub addr: Option<SocketAddr>,
}

/// Connection state of a peer, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    NotConnected,
}

/// Browser-level discovery events.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    PeerFound {
        peer: DiscoveredPeer,
        payload: DiscoveryPayload,
    },
    PeerLost(DiscoveredPeer),
}

/// Everything a backend reports back to its owner.
#[derive(Debug, Clone)]
pub enum NetEvent {
    Connection {
        peer: PeerHandle,
        state: ConnectionState,
    },
    Data {
        from: PeerHandle,
        bytes: Bytes,
    },
    Discovery(DiscoveryEvent),
}

pub type EventSender = mpsc::UnboundedSender<NetEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<NetEvent>;

/// Broadcasts local presence.
#[async_trait]
pub trait AdvertiseBackend: Send + Sync {
    /// Begin advertising under `descriptor` with `payload` attached,
    /// replacing any previous advertisement.
    async fn start(&self, descriptor: &ServiceDescriptor, payload: &DiscoveryPayload)
        -> Result<()>;

    /// Stop advertising. Safe to call when not advertising.
    async fn stop(&self);
}

/// Scans for advertisers and delivers invitations.
#[async_trait]
pub trait BrowseBackend: Send + Sync {
    /// Begin scanning for advertisers under `descriptor`. Discovered peers
    /// are reported as [`DiscoveryEvent`]s. Starting again rescans, so
    /// peers still present are reported again.
    async fn start(&self, descriptor: &ServiceDescriptor) -> Result<()>;

    /// Stop scanning. Safe to call when not browsing.
    async fn stop(&self);

    /// Invite a discovered peer into the session. The receiving side
    /// accepts automatically; success is reported as a `Connected` event.
    /// Inviting a peer that is already connected is a no-op.
    async fn invite(&self, peer: &DiscoveredPeer, timeout: Duration) -> Result<()>;
}

/// Reliable multi-peer message channel.
#[async_trait]
pub trait TransportBackend: Send + Sync {
    /// Display name of the local node.
    fn local_peer(&self) -> &PeerId;

    /// Currently live connections.
    async fn connected_peers(&self) -> Vec<PeerHandle>;

    /// Send one frame to each of `to`.
    async fn send(&self, bytes: Bytes, to: &[PeerHandle]) -> Result<()>;

    /// Close every connection. Each closed link is reported as
    /// `NotConnected`.
    async fn disconnect_all(&self);
}

/// The three roles of one node plus its event stream.
pub struct NetworkParts {
    pub advertiser: Arc<dyn AdvertiseBackend>,
    pub browser: Arc<dyn BrowseBackend>,
    pub transport: Arc<dyn TransportBackend>,
    pub events: EventReceiver,
}

impl std::fmt::Debug for NetworkParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkParts")
            .field("local_peer", self.transport.local_peer())
            .finish_non_exhaustive()
    }
}
