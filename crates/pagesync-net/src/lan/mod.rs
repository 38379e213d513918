//! Local-network backend: UDP beacons for discovery, TCP for links.
//!
//! ## Roles
//!
//! - **Advertise**: broadcast a [`Beacon`] every `beacon_interval`
//! - **Browse**: listen on `discovery_port`, report peers with the same
//!   descriptor, forget them after `peer_ttl` of silence
//! - **Invite**: dial the peer's TCP port and exchange a `Hello`; the
//!   listening side accepts automatically
//!
//! When two nodes discover each other only the one with the lower instance
//! id dials, so each pair ends up with a single link. When a link closes for
//! any reason the browser forgets the peer, so its next beacon reports it
//! again and the lower side can dial anew.
//!
//! A handshake that completes after the discovery role it was started under
//! was stopped or restarted is dropped instead of becoming a link.

mod beacon;
mod link;

pub use beacon::Beacon;
pub use link::Hello;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pagesync_core::{
    DiscoveryPayload, InstanceId, PeerHandle, PeerId, ServiceDescriptor, MAX_FRAME_LEN,
    PROTOCOL_VERSION,
};

use crate::error::{NetError, Result};
use crate::traits::{
    AdvertiseBackend, BrowseBackend, ConnectionState, DiscoveredPeer, EventSender, NetEvent,
    NetworkParts, TransportBackend,
};

use beacon::PeerTable;
use link::FramedLink;

/// Configuration for the LAN backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanConfig {
    /// Local address for all sockets.
    pub bind_addr: IpAddr,
    /// Where beacons are sent.
    pub broadcast_addr: IpAddr,
    /// UDP port beacons are sent to and browsed on.
    pub discovery_port: u16,
    #[serde(with = "pagesync_core::duration")]
    pub beacon_interval: Duration,
    /// Silence after which a discovered peer is reported lost.
    #[serde(with = "pagesync_core::duration")]
    pub peer_ttl: Duration,
    /// Bound on the inbound `Hello` exchange.
    #[serde(with = "pagesync_core::duration")]
    pub handshake_timeout: Duration,
    pub max_frame_len: usize,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            discovery_port: 53317,
            beacon_interval: Duration::from_secs(1),
            peer_ttl: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

struct Link {
    handle: PeerHandle,
    instance: InstanceId,
    outbound: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Link {
    fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

struct Browse {
    descriptor: ServiceDescriptor,
    task: JoinHandle<()>,
    /// Instances the browser should forget.
    forget: mpsc::UnboundedSender<InstanceId>,
}

#[derive(Default)]
struct LanState {
    advert: Option<(ServiceDescriptor, DiscoveryPayload)>,
    /// Bumped on every advertise start and stop.
    advert_epoch: u64,
    beacon_task: Option<JoinHandle<()>>,
    browse: Option<Browse>,
    /// Bumped on every browse start and stop.
    browse_epoch: u64,
    /// Bound once, reused by every rescan.
    browse_socket: Option<Arc<UdpSocket>>,
    links: HashMap<u64, Link>,
}

impl LanState {
    /// Make the browser report `instance` again on its next beacon.
    fn forget(&self, instance: InstanceId) {
        if let Some(browse) = &self.browse {
            let _ = browse.forget.send(instance);
        }
    }
}

/// The discovery role a handshake was started under. It must still be
/// current when the handshake completes.
#[derive(Debug, Clone, Copy)]
enum Gate {
    Advertising(u64),
    Browsing(u64),
}

impl Gate {
    fn holds(self, state: &LanState) -> bool {
        match self {
            Gate::Advertising(epoch) => state.advert.is_some() && state.advert_epoch == epoch,
            Gate::Browsing(epoch) => state.browse.is_some() && state.browse_epoch == epoch,
        }
    }
}

struct Shared {
    name: PeerId,
    instance: InstanceId,
    config: LanConfig,
    listen_port: u16,
    events: EventSender,
    state: Mutex<LanState>,
    next_link: AtomicU64,
}

/// A node on the local network. Plays all three backend roles.
pub struct LanNode {
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl LanNode {
    /// Bind the invitation listener and return the node's backend parts.
    pub async fn bind(name: PeerId, config: LanConfig) -> Result<NetworkParts> {
        Self::bind_with_instance(name, InstanceId::random(), config).await
    }

    pub(crate) async fn bind_with_instance(
        name: PeerId,
        instance: InstanceId,
        config: LanConfig,
    ) -> Result<NetworkParts> {
        let listener = TcpListener::bind(SocketAddr::new(config.bind_addr, 0)).await?;
        let listen_port = listener.local_addr()?.port();
        let (tx, rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            name,
            instance,
            config,
            listen_port,
            events: tx,
            state: Mutex::new(LanState::default()),
            next_link: AtomicU64::new(0),
        });
        info!(
            name = %shared.name,
            instance = %instance,
            port = listen_port,
            "LAN node listening for invitations"
        );

        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        let node = Arc::new(LanNode {
            shared,
            accept_task,
        });

        Ok(NetworkParts {
            advertiser: node.clone(),
            browser: node.clone(),
            transport: node,
            events: rx,
        })
    }
}

impl Drop for LanNode {
    fn drop(&mut self) {
        self.accept_task.abort();
        if let Ok(mut state) = self.shared.state.try_lock() {
            if let Some(task) = state.beacon_task.take() {
                task.abort();
            }
            if let Some(browse) = state.browse.take() {
                browse.task.abort();
            }
            for (_, link) in state.links.drain() {
                link.abort();
            }
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    if let Err(e) = shared.accept_invitation(stream).await {
                        debug!(error = %e, %addr, "inbound invitation dropped");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

impl Shared {
    fn next_link(&self) -> u64 {
        self.next_link.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn emit(&self, event: NetEvent) {
        let _ = self.events.send(event);
    }

    fn hello(&self, descriptor: ServiceDescriptor) -> Hello {
        Hello::new(descriptor, self.name.clone(), self.instance)
    }

    async fn accept_invitation(self: &Arc<Self>, stream: TcpStream) -> Result<()> {
        let (descriptor, gate) = {
            let state = self.state.lock().await;
            match &state.advert {
                Some((descriptor, _)) => {
                    (descriptor.clone(), Gate::Advertising(state.advert_epoch))
                }
                None => return Err(NetError::InviteFailed("not advertising".into())),
            }
        };

        let mut link = link::framed(stream, self.config.max_frame_len);
        let remote =
            link::handshake_inbound(&mut link, &self.hello(descriptor), self.config.handshake_timeout)
                .await?;

        let id = self.next_link();
        self.emit(NetEvent::Connection {
            peer: PeerHandle::new(id, remote.name.clone()),
            state: ConnectionState::Connecting,
        });
        self.register_link(id, link, remote, gate).await
    }

    async fn invite(self: &Arc<Self>, peer: &DiscoveredPeer, timeout: Duration) -> Result<()> {
        let (descriptor, gate) = {
            let state = self.state.lock().await;
            if state.links.values().any(|link| link.instance == peer.instance) {
                return Ok(());
            }
            match &state.browse {
                Some(browse) => (
                    browse.descriptor.clone(),
                    Gate::Browsing(state.browse_epoch),
                ),
                None => return Err(NetError::InviteFailed("not browsing".into())),
            }
        };

        if self.instance > peer.instance {
            debug!(peer = %peer.name, "waiting for peer to dial");
            return Ok(());
        }
        let addr = peer
            .addr
            .ok_or_else(|| NetError::InviteFailed(format!("no address for {}", peer.name)))?;

        let id = self.next_link();
        let handle = PeerHandle::new(id, peer.name.clone());
        self.emit(NetEvent::Connection {
            peer: handle.clone(),
            state: ConnectionState::Connecting,
        });

        let result = async {
            let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| NetError::InviteTimeout(peer.name.to_string()))??;
            let mut link = link::framed(stream, self.config.max_frame_len);
            let remote = link::handshake_outbound(&mut link, &self.hello(descriptor), timeout).await?;
            Ok::<_, NetError>((link, remote))
        }
        .await;

        match result {
            Ok((link, remote)) => self.register_link(id, link, remote, gate).await,
            Err(e) => {
                self.emit(NetEvent::Connection {
                    peer: handle,
                    state: ConnectionState::NotConnected,
                });
                Err(e)
            }
        }
    }

    /// Turn a completed handshake into a live link, unless `gate` no
    /// longer holds or the peer is already linked. Either way the stream is
    /// dropped and `NotConnected` reported for `id`.
    async fn register_link(
        self: &Arc<Self>,
        id: u64,
        link: FramedLink,
        remote: Hello,
        gate: Gate,
    ) -> Result<()> {
        let handle = PeerHandle::new(id, remote.name.clone());
        let mut state = self.state.lock().await;

        if !gate.holds(&state) {
            drop(state);
            drop(link);
            debug!(peer = %handle, ?gate, "discovery changed during handshake, link dropped");
            self.emit(NetEvent::Connection {
                peer: handle,
                state: ConnectionState::NotConnected,
            });
            return Err(NetError::InviteFailed(
                "discovery stopped during handshake".into(),
            ));
        }

        if state.links.values().any(|l| l.instance == remote.instance) {
            debug!(peer = %handle, "duplicate link dropped");
            drop(state);
            self.emit(NetEvent::Connection {
                peer: handle,
                state: ConnectionState::NotConnected,
            });
            return Ok(());
        }

        let (mut sink, mut stream) = link.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

        let writer = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if sink.send(bytes).await.is_err() {
                    break;
                }
            }
        });

        // Announce before the reader can report data from this peer.
        info!(peer = %handle, "link established");
        self.emit(NetEvent::Connection {
            peer: handle.clone(),
            state: ConnectionState::Connected,
        });

        let shared = Arc::clone(self);
        let from = handle.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(frame) => shared.emit(NetEvent::Data {
                        from: from.clone(),
                        bytes: frame.freeze(),
                    }),
                    Err(e) => {
                        debug!(peer = %from, error = %e, "link read failed");
                        break;
                    }
                }
            }
            shared.close_link(from.id()).await;
        });

        state.links.insert(
            id,
            Link {
                handle,
                instance: remote.instance,
                outbound: tx,
                reader,
                writer,
            },
        );
        Ok(())
    }

    async fn close_link(&self, id: u64) {
        let removed = {
            let mut state = self.state.lock().await;
            let removed = state.links.remove(&id);
            if let Some(link) = &removed {
                state.forget(link.instance);
            }
            removed
        };
        if let Some(link) = removed {
            link.writer.abort();
            info!(peer = %link.handle, "link closed");
            self.emit(NetEvent::Connection {
                peer: link.handle,
                state: ConnectionState::NotConnected,
            });
        }
    }
}

#[async_trait]
impl AdvertiseBackend for LanNode {
    async fn start(
        &self,
        descriptor: &ServiceDescriptor,
        payload: &DiscoveryPayload,
    ) -> Result<()> {
        let config = &self.shared.config;
        let socket = UdpSocket::bind(SocketAddr::new(config.bind_addr, 0))
            .await
            .map_err(|e| NetError::AdvertiseFailed(e.to_string()))?;
        socket
            .set_broadcast(true)
            .map_err(|e| NetError::AdvertiseFailed(e.to_string()))?;

        let beacon = Beacon {
            v: PROTOCOL_VERSION,
            descriptor: descriptor.clone(),
            name: self.shared.name.clone(),
            instance: self.shared.instance,
            port: self.shared.listen_port,
            payload: payload.clone(),
        };
        let target = SocketAddr::new(config.broadcast_addr, config.discovery_port);
        let task = tokio::spawn(beacon::run_beacon(socket, target, beacon, config.beacon_interval));

        let mut state = self.shared.state.lock().await;
        if let Some(old) = state.beacon_task.replace(task) {
            old.abort();
        }
        state.advert = Some((descriptor.clone(), payload.clone()));
        state.advert_epoch += 1;
        Ok(())
    }

    async fn stop(&self) {
        let mut state = self.shared.state.lock().await;
        if let Some(task) = state.beacon_task.take() {
            task.abort();
        }
        state.advert = None;
        state.advert_epoch += 1;
    }
}

#[async_trait]
impl BrowseBackend for LanNode {
    async fn start(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        let config = &self.shared.config;
        let mut state = self.shared.state.lock().await;
        if let Some(old) = state.browse.take() {
            old.task.abort();
        }
        state.browse_epoch += 1;

        let socket = match &state.browse_socket {
            Some(socket) => Arc::clone(socket),
            None => {
                let socket =
                    UdpSocket::bind(SocketAddr::new(config.bind_addr, config.discovery_port))
                        .await
                        .map_err(|e| NetError::BrowseFailed(e.to_string()))?;
                let socket = Arc::new(socket);
                state.browse_socket = Some(Arc::clone(&socket));
                socket
            }
        };

        // A fresh table re-reports every peer still beaconing.
        let table = PeerTable::new(descriptor.clone(), self.shared.instance, config.peer_ttl);
        let (forget, forget_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(beacon::run_browser(
            socket,
            table,
            forget_rx,
            self.shared.events.clone(),
        ));
        state.browse = Some(Browse {
            descriptor: descriptor.clone(),
            task,
            forget,
        });
        Ok(())
    }

    async fn stop(&self) {
        let mut state = self.shared.state.lock().await;
        if let Some(browse) = state.browse.take() {
            browse.task.abort();
        }
        state.browse_epoch += 1;
    }

    async fn invite(&self, peer: &DiscoveredPeer, timeout: Duration) -> Result<()> {
        self.shared.invite(peer, timeout).await
    }
}

#[async_trait]
impl TransportBackend for LanNode {
    fn local_peer(&self) -> &PeerId {
        &self.shared.name
    }

    async fn connected_peers(&self) -> Vec<PeerHandle> {
        let state = self.shared.state.lock().await;
        let mut peers: Vec<_> = state.links.values().map(|link| link.handle.clone()).collect();
        peers.sort();
        peers
    }

    async fn send(&self, bytes: Bytes, to: &[PeerHandle]) -> Result<()> {
        let state = self.shared.state.lock().await;
        for handle in to {
            let link = state
                .links
                .get(&handle.id())
                .ok_or_else(|| NetError::PeerNotConnected(handle.to_string()))?;
            link.outbound
                .send(bytes.clone())
                .map_err(|_| NetError::SendFailed(format!("link to {} closed", handle)))?;
        }
        Ok(())
    }

    async fn disconnect_all(&self) {
        let links: Vec<Link> = {
            let mut state = self.shared.state.lock().await;
            let links: Vec<Link> = state.links.drain().map(|(_, link)| link).collect();
            for link in &links {
                state.forget(link.instance);
            }
            links
        };

        for link in links {
            link.abort();
            self.shared.emit(NetEvent::Connection {
                peer: link.handle,
                state: ConnectionState::NotConnected,
            });
        }
    }
}
