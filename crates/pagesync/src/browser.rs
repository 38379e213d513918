//! Peer discovery and invitations.
//!
//! Only peers advertising exactly our payload are invited. Everyone else is
//! invisible: not an error, and not reported to the host.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pagesync_core::{DiscoveryPayload, ServiceDescriptor};
use pagesync_net::{BrowseBackend, DiscoveredPeer, Result as NetResult};
use tracing::{debug, info};

/// A request to connect to a discovered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub peer: DiscoveredPeer,
    pub timeout: Duration,
}

/// Scans for advertisers and decides whom to invite.
pub struct DiscoveryBrowser {
    backend: Arc<dyn BrowseBackend>,
    local_payload: DiscoveryPayload,
    invite_timeout: Duration,
    browsing: bool,
}

impl DiscoveryBrowser {
    pub fn new(backend: Arc<dyn BrowseBackend>, invite_timeout: Duration) -> Self {
        Self {
            backend,
            local_payload: DiscoveryPayload::new(),
            invite_timeout,
            browsing: false,
        }
    }

    pub fn is_browsing(&self) -> bool {
        self.browsing
    }

    /// Start (or restart) scanning under `descriptor`, inviting peers whose
    /// payload equals `payload`.
    pub async fn start(
        &mut self,
        descriptor: &ServiceDescriptor,
        payload: &DiscoveryPayload,
    ) -> NetResult<()> {
        self.local_payload = payload.clone();
        self.browsing = false;
        self.backend.start(descriptor).await?;
        self.browsing = true;
        info!(descriptor = %descriptor, "browsing");
        Ok(())
    }

    pub async fn stop(&mut self) {
        if self.browsing {
            self.browsing = false;
            self.backend.stop().await;
            debug!("browsing stopped");
        }
    }

    /// Decide whether a discovered peer gets an invitation.
    pub fn on_peer_found(
        &self,
        peer: DiscoveredPeer,
        payload: &DiscoveryPayload,
    ) -> Option<Invitation> {
        if !self.browsing {
            return None;
        }
        if *payload != self.local_payload {
            debug!(
                peer = %peer.name,
                theirs = ?payload.page_count(),
                ours = ?self.local_payload.page_count(),
                "payload mismatch, not inviting"
            );
            return None;
        }
        Some(Invitation {
            peer,
            timeout: self.invite_timeout,
        })
    }

    /// Status text for a peer that stopped advertising. The peer set is
    /// left alone; only the transport decides who is connected.
    pub fn on_peer_lost(&self, peer: &DiscoveredPeer) -> String {
        debug!(peer = %peer.name, "peer lost");
        format!("{} is no longer visible", peer.name)
    }

    /// Deliver an invitation. The returned future owns everything it needs
    /// and can be spawned.
    pub fn invite(
        &self,
        invitation: Invitation,
    ) -> impl Future<Output = (Invitation, NetResult<()>)> + Send + 'static {
        let backend = Arc::clone(&self.backend);
        async move {
            let result = backend.invite(&invitation.peer, invitation.timeout).await;
            (invitation, result)
        }
    }
}
