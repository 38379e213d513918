//! An in-process network for tests.
//!
//! Nodes joined to the same [`MemoryNetwork`] see each other's
//! advertisements, connect through invitations and exchange frames through
//! channels. Failure injection hooks let tests exercise the retry paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use pagesync_core::{DiscoveryPayload, InstanceId, PeerHandle, PeerId, ServiceDescriptor};

use crate::error::{NetError, Result};
use crate::traits::{
    AdvertiseBackend, BrowseBackend, ConnectionState, DiscoveredPeer, DiscoveryEvent, EventSender,
    NetEvent, NetworkParts, TransportBackend,
};

/// Shared state for all nodes of the in-memory network.
pub struct MemoryNetwork {
    nodes: Mutex<HashMap<InstanceId, NodeEntry>>,
    next_instance: AtomicU64,
    next_link: AtomicU64,
}

struct NodeEntry {
    name: PeerId,
    events: EventSender,
    advert: Option<(ServiceDescriptor, DiscoveryPayload)>,
    browsing: Option<ServiceDescriptor>,
    /// Remote instance -> local link id.
    links: HashMap<InstanceId, u64>,
    fail_advertise: usize,
    fail_browse: usize,
    sent_frames: usize,
}

impl NodeEntry {
    fn emit(&self, event: NetEvent) {
        // A node whose session has shut down just stops listening.
        let _ = self.events.send(event);
    }

    fn discovered(&self, instance: InstanceId) -> DiscoveredPeer {
        DiscoveredPeer {
            name: self.name.clone(),
            instance,
            addr: None,
        }
    }

    fn handle_for(&self, remote: &InstanceId, name: &PeerId) -> Option<PeerHandle> {
        self.links
            .get(remote)
            .map(|&id| PeerHandle::new(id, name.clone()))
    }
}

impl MemoryNetwork {
    /// Create a new memory network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join a node to the network.
    ///
    /// Returns the node's instance id (for test hooks) and its backend
    /// parts.
    pub async fn join(self: &Arc<Self>, name: PeerId) -> (InstanceId, NetworkParts) {
        let instance = InstanceId(self.next_instance.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();

        self.nodes.lock().await.insert(
            instance,
            NodeEntry {
                name: name.clone(),
                events: tx,
                advert: None,
                browsing: None,
                links: HashMap::new(),
                fail_advertise: 0,
                fail_browse: 0,
                sent_frames: 0,
            },
        );

        let node = Arc::new(MemoryNode {
            network: Arc::clone(self),
            instance,
            name,
        });

        let parts = NetworkParts {
            advertiser: node.clone(),
            browser: node.clone(),
            transport: node,
            events: rx,
        };
        (instance, parts)
    }

    /// Make the next `count` advertise attempts of `node` fail.
    pub async fn fail_next_advertise(&self, node: InstanceId, count: usize) {
        if let Some(entry) = self.nodes.lock().await.get_mut(&node) {
            entry.fail_advertise = count;
        }
    }

    /// Make the next `count` browse attempts of `node` fail.
    pub async fn fail_next_browse(&self, node: InstanceId, count: usize) {
        if let Some(entry) = self.nodes.lock().await.get_mut(&node) {
            entry.fail_browse = count;
        }
    }

    /// Number of frames `node` has put on the wire.
    pub async fn sent_frames(&self, node: InstanceId) -> usize {
        self.nodes
            .lock()
            .await
            .get(&node)
            .map_or(0, |entry| entry.sent_frames)
    }

    /// Whether `node` is currently advertising.
    pub async fn is_advertising(&self, node: InstanceId) -> bool {
        self.nodes
            .lock()
            .await
            .get(&node)
            .is_some_and(|entry| entry.advert.is_some())
    }

    /// Number of live links of `node`.
    pub async fn link_count(&self, node: InstanceId) -> usize {
        self.nodes
            .lock()
            .await
            .get(&node)
            .map_or(0, |entry| entry.links.len())
    }

    /// Deliver raw bytes to `node` as if sent by `from`.
    pub async fn deliver(&self, node: InstanceId, from: PeerHandle, bytes: Bytes) {
        if let Some(entry) = self.nodes.lock().await.get(&node) {
            entry.emit(NetEvent::Data { from, bytes });
        }
    }

    /// Link two nodes directly, as if an invitation issued earlier had just
    /// been accepted. Ignores advertising and browsing state.
    pub async fn link(&self, a: InstanceId, b: InstanceId) {
        let mut nodes = self.nodes.lock().await;
        self.connect(&mut nodes, a, b);
    }

    fn next_link(&self) -> u64 {
        self.next_link.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a link on both ends and report `Connecting` then `Connected`
    /// to each.
    fn connect(&self, nodes: &mut HashMap<InstanceId, NodeEntry>, a: InstanceId, b: InstanceId) {
        let (Some(a_entry), Some(b_entry)) = (nodes.get(&a), nodes.get(&b)) else {
            return;
        };
        if a_entry.links.contains_key(&b) {
            return;
        }
        let a_name = a_entry.name.clone();
        let b_name = b_entry.name.clone();

        let a_link = self.next_link();
        let b_link = self.next_link();
        for (node, other, handle) in [
            (a, b, PeerHandle::new(a_link, b_name)),
            (b, a, PeerHandle::new(b_link, a_name)),
        ] {
            if let Some(entry) = nodes.get_mut(&node) {
                entry.links.insert(other, handle.id());
                for state in [ConnectionState::Connecting, ConnectionState::Connected] {
                    entry.emit(NetEvent::Connection {
                        peer: handle.clone(),
                        state,
                    });
                }
            }
        }
    }

    /// Remove a node abruptly, as if its process died.
    pub async fn leave(&self, node: InstanceId) {
        let mut nodes = self.nodes.lock().await;
        let Some(entry) = nodes.remove(&node) else {
            return;
        };

        for (remote, _) in entry.links.iter() {
            if let Some(other) = nodes.get_mut(remote) {
                if let Some(handle) = other.handle_for(&node, &entry.name) {
                    other.links.remove(&node);
                    other.emit(NetEvent::Connection {
                        peer: handle,
                        state: ConnectionState::NotConnected,
                    });
                }
            }
        }

        if let Some((descriptor, _)) = &entry.advert {
            for other in nodes.values() {
                if other.browsing.as_ref() == Some(descriptor) {
                    other.emit(NetEvent::Discovery(DiscoveryEvent::PeerLost(
                        entry.discovered(node),
                    )));
                }
            }
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            next_instance: AtomicU64::new(0),
            next_link: AtomicU64::new(0),
        }
    }
}

/// One node of a [`MemoryNetwork`]. Plays all three backend roles.
pub struct MemoryNode {
    network: Arc<MemoryNetwork>,
    instance: InstanceId,
    name: PeerId,
}

#[async_trait]
impl AdvertiseBackend for MemoryNode {
    async fn start(
        &self,
        descriptor: &ServiceDescriptor,
        payload: &DiscoveryPayload,
    ) -> Result<()> {
        let mut nodes = self.network.nodes.lock().await;
        let entry = nodes.get_mut(&self.instance).ok_or(NetError::Closed)?;

        if entry.fail_advertise > 0 {
            entry.fail_advertise -= 1;
            return Err(NetError::AdvertiseFailed("injected failure".into()));
        }
        entry.advert = Some((descriptor.clone(), payload.clone()));
        let me = entry.discovered(self.instance);

        for (id, other) in nodes.iter() {
            if *id != self.instance && other.browsing.as_ref() == Some(descriptor) {
                other.emit(NetEvent::Discovery(DiscoveryEvent::PeerFound {
                    peer: me.clone(),
                    payload: payload.clone(),
                }));
            }
        }
        Ok(())
    }

    async fn stop(&self) {
        let mut nodes = self.network.nodes.lock().await;
        let Some(entry) = nodes.get_mut(&self.instance) else {
            return;
        };
        let Some((descriptor, _)) = entry.advert.take() else {
            return;
        };
        let me = entry.discovered(self.instance);

        for (id, other) in nodes.iter() {
            if *id != self.instance && other.browsing.as_ref() == Some(&descriptor) {
                other.emit(NetEvent::Discovery(DiscoveryEvent::PeerLost(me.clone())));
            }
        }
    }
}

#[async_trait]
impl BrowseBackend for MemoryNode {
    async fn start(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        let mut nodes = self.network.nodes.lock().await;
        let entry = nodes.get_mut(&self.instance).ok_or(NetError::Closed)?;

        if entry.fail_browse > 0 {
            entry.fail_browse -= 1;
            return Err(NetError::BrowseFailed("injected failure".into()));
        }
        entry.browsing = Some(descriptor.clone());

        let entry = &nodes[&self.instance];
        for (id, other) in nodes.iter() {
            if *id == self.instance {
                continue;
            }
            if let Some((advertised, payload)) = &other.advert {
                if advertised == descriptor {
                    entry.emit(NetEvent::Discovery(DiscoveryEvent::PeerFound {
                        peer: other.discovered(*id),
                        payload: payload.clone(),
                    }));
                }
            }
        }
        Ok(())
    }

    async fn stop(&self) {
        if let Some(entry) = self.network.nodes.lock().await.get_mut(&self.instance) {
            entry.browsing = None;
        }
    }

    async fn invite(&self, peer: &DiscoveredPeer, _timeout: Duration) -> Result<()> {
        let mut nodes = self.network.nodes.lock().await;

        let descriptor = {
            let local = nodes.get(&self.instance).ok_or(NetError::Closed)?;
            if local.links.contains_key(&peer.instance) {
                return Ok(());
            }
            local
                .browsing
                .clone()
                .ok_or_else(|| NetError::InviteFailed("not browsing".into()))?
        };

        let remote = nodes
            .get(&peer.instance)
            .ok_or_else(|| NetError::InviteFailed(format!("{} is gone", peer.name)))?;
        if remote.advert.as_ref().map(|(d, _)| d) != Some(&descriptor) {
            return Err(NetError::InviteFailed(format!(
                "{} is not advertising {}",
                peer.name, descriptor
            )));
        }

        self.network.connect(&mut nodes, self.instance, peer.instance);
        Ok(())
    }
}

#[async_trait]
impl TransportBackend for MemoryNode {
    fn local_peer(&self) -> &PeerId {
        &self.name
    }

    async fn connected_peers(&self) -> Vec<PeerHandle> {
        let nodes = self.network.nodes.lock().await;
        let Some(entry) = nodes.get(&self.instance) else {
            return Vec::new();
        };

        entry
            .links
            .iter()
            .filter_map(|(remote, &id)| {
                nodes
                    .get(remote)
                    .map(|other| PeerHandle::new(id, other.name.clone()))
            })
            .collect()
    }

    async fn send(&self, bytes: Bytes, to: &[PeerHandle]) -> Result<()> {
        let mut nodes = self.network.nodes.lock().await;
        let links = nodes
            .get(&self.instance)
            .ok_or(NetError::Closed)?
            .links
            .clone();

        let mut delivered = 0;
        for handle in to {
            let remote = links
                .iter()
                .find(|(_, id)| **id == handle.id())
                .map(|(remote, _)| *remote)
                .ok_or_else(|| NetError::PeerNotConnected(handle.to_string()))?;

            if let Some(other) = nodes.get(&remote) {
                if let Some(from) = other.handle_for(&self.instance, &self.name) {
                    other.emit(NetEvent::Data {
                        from,
                        bytes: bytes.clone(),
                    });
                    delivered += 1;
                }
            }
        }

        if let Some(entry) = nodes.get_mut(&self.instance) {
            entry.sent_frames += delivered;
        }
        Ok(())
    }

    async fn disconnect_all(&self) {
        let mut nodes = self.network.nodes.lock().await;
        let Some(entry) = nodes.get_mut(&self.instance) else {
            return;
        };
        let links: Vec<_> = entry.links.drain().collect();

        for (remote, local_id) in links {
            let remote_name = nodes.get(&remote).map(|other| other.name.clone());
            if let Some(other) = nodes.get_mut(&remote) {
                if let Some(handle) = other.handle_for(&self.instance, &self.name) {
                    other.links.remove(&self.instance);
                    other.emit(NetEvent::Connection {
                        peer: handle,
                        state: ConnectionState::NotConnected,
                    });
                }
            }
            if let (Some(entry), Some(name)) = (nodes.get(&self.instance), remote_name) {
                entry.emit(NetEvent::Connection {
                    peer: PeerHandle::new(local_id, name),
                    state: ConnectionState::NotConnected,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor::declared("slides").unwrap()
    }

    async fn next_event(parts: &mut NetworkParts) -> NetEvent {
        tokio::time::timeout(Duration::from_secs(1), parts.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_browser_sees_existing_advertiser() {
        let network = MemoryNetwork::new();
        let (_, a) = network.join(PeerId::new("a")).await;
        let (_, mut b) = network.join(PeerId::new("b")).await;

        a.advertiser
            .start(&descriptor(), &DiscoveryPayload::for_page_count(10))
            .await
            .unwrap();
        b.browser.start(&descriptor()).await.unwrap();

        match next_event(&mut b).await {
            NetEvent::Discovery(DiscoveryEvent::PeerFound { peer, payload }) => {
                assert_eq!(peer.name, PeerId::new("a"));
                assert_eq!(payload.page_count(), Some(10));
            }
            other => panic!("expected PeerFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_other_descriptor_invisible() {
        let network = MemoryNetwork::new();
        let (_, a) = network.join(PeerId::new("a")).await;
        let (_, mut b) = network.join(PeerId::new("b")).await;

        a.advertiser
            .start(
                &ServiceDescriptor::declared("scores").unwrap(),
                &DiscoveryPayload::for_page_count(10),
            )
            .await
            .unwrap();
        b.browser.start(&descriptor()).await.unwrap();

        assert!(b.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invite_connects_both_sides_and_delivers_data() {
        let network = MemoryNetwork::new();
        let (a_id, mut a) = network.join(PeerId::new("a")).await;
        let (_, mut b) = network.join(PeerId::new("b")).await;

        a.advertiser
            .start(&descriptor(), &DiscoveryPayload::for_page_count(3))
            .await
            .unwrap();
        b.browser.start(&descriptor()).await.unwrap();

        let peer = match next_event(&mut b).await {
            NetEvent::Discovery(DiscoveryEvent::PeerFound { peer, .. }) => peer,
            other => panic!("expected PeerFound, got {:?}", other),
        };
        b.browser.invite(&peer, Duration::from_secs(1)).await.unwrap();
        // Second invite is a no-op.
        b.browser.invite(&peer, Duration::from_secs(1)).await.unwrap();

        for parts in [&mut a, &mut b] {
            assert!(matches!(
                next_event(parts).await,
                NetEvent::Connection { state: ConnectionState::Connecting, .. }
            ));
            assert!(matches!(
                next_event(parts).await,
                NetEvent::Connection { state: ConnectionState::Connected, .. }
            ));
        }

        let to = b.transport.connected_peers().await;
        assert_eq!(to.len(), 1);
        b.transport.send(Bytes::from_static(b"hi"), &to).await.unwrap();

        match next_event(&mut a).await {
            NetEvent::Data { from, bytes } => {
                assert_eq!(from.name(), &PeerId::new("b"));
                assert_eq!(&bytes[..], b"hi");
            }
            other => panic!("expected Data, got {:?}", other),
        }
        assert_eq!(network.link_count(a_id).await, 1);
    }

    #[tokio::test]
    async fn test_disconnect_all_notifies_both_sides() {
        let network = MemoryNetwork::new();
        let (a_id, mut a) = network.join(PeerId::new("a")).await;
        let (b_id, mut b) = network.join(PeerId::new("b")).await;

        a.advertiser
            .start(&descriptor(), &DiscoveryPayload::for_page_count(3))
            .await
            .unwrap();
        b.browser.start(&descriptor()).await.unwrap();
        let peer = match next_event(&mut b).await {
            NetEvent::Discovery(DiscoveryEvent::PeerFound { peer, .. }) => peer,
            other => panic!("expected PeerFound, got {:?}", other),
        };
        b.browser.invite(&peer, Duration::from_secs(1)).await.unwrap();
        for _ in 0..2 {
            next_event(&mut a).await;
            next_event(&mut b).await;
        }

        b.transport.disconnect_all().await;

        for parts in [&mut a, &mut b] {
            assert!(matches!(
                next_event(parts).await,
                NetEvent::Connection { state: ConnectionState::NotConnected, .. }
            ));
        }
        assert_eq!(network.link_count(a_id).await, 0);
        assert_eq!(network.link_count(b_id).await, 0);
    }

    #[tokio::test]
    async fn test_leave_drops_links_and_advertisement() {
        let network = MemoryNetwork::new();
        let (a_id, a) = network.join(PeerId::new("a")).await;
        let (b_id, mut b) = network.join(PeerId::new("b")).await;

        a.advertiser
            .start(&descriptor(), &DiscoveryPayload::for_page_count(3))
            .await
            .unwrap();
        b.browser.start(&descriptor()).await.unwrap();
        let peer = match next_event(&mut b).await {
            NetEvent::Discovery(DiscoveryEvent::PeerFound { peer, .. }) => peer,
            other => panic!("expected PeerFound, got {:?}", other),
        };
        b.browser.invite(&peer, Duration::from_secs(1)).await.unwrap();
        next_event(&mut b).await;
        next_event(&mut b).await;

        network.leave(a_id).await;

        assert!(matches!(
            next_event(&mut b).await,
            NetEvent::Connection { state: ConnectionState::NotConnected, .. }
        ));
        assert!(matches!(
            next_event(&mut b).await,
            NetEvent::Discovery(DiscoveryEvent::PeerLost(_))
        ));
        assert_eq!(network.link_count(b_id).await, 0);
        assert!(!network.is_advertising(a_id).await);
    }

    #[tokio::test]
    async fn test_direct_link_ignores_discovery_state() {
        let network = MemoryNetwork::new();
        let (a_id, mut a) = network.join(PeerId::new("a")).await;
        let (b_id, mut b) = network.join(PeerId::new("b")).await;

        network.link(a_id, b_id).await;
        network.link(b_id, a_id).await;

        for parts in [&mut a, &mut b] {
            assert!(matches!(
                next_event(parts).await,
                NetEvent::Connection { state: ConnectionState::Connecting, .. }
            ));
            assert!(matches!(
                next_event(parts).await,
                NetEvent::Connection { state: ConnectionState::Connected, .. }
            ));
            assert!(parts.events.try_recv().is_err());
        }
        assert_eq!(network.link_count(a_id).await, 1);
        assert!(!network.is_advertising(a_id).await);
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_fails() {
        let network = MemoryNetwork::new();
        let (_, a) = network.join(PeerId::new("a")).await;

        let ghost = PeerHandle::new(999, PeerId::new("ghost"));
        let err = a
            .transport
            .send(Bytes::from_static(b"x"), &[ghost])
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::PeerNotConnected(_)));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let network = MemoryNetwork::new();
        let (a_id, a) = network.join(PeerId::new("a")).await;

        network.fail_next_advertise(a_id, 1).await;
        let payload = DiscoveryPayload::for_page_count(1);
        assert!(a.advertiser.start(&descriptor(), &payload).await.is_err());
        assert!(a.advertiser.start(&descriptor(), &payload).await.is_ok());
        assert!(network.is_advertising(a_id).await);

        network.fail_next_browse(a_id, 2).await;
        assert!(a.browser.start(&descriptor()).await.is_err());
        assert!(a.browser.start(&descriptor()).await.is_err());
        assert!(a.browser.start(&descriptor()).await.is_ok());
    }
}
