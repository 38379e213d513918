//! UDP presence beacons.
//!
//! An advertising node periodically broadcasts a small CBOR beacon. A
//! browsing node listens on the discovery port, reports peers the first time
//! they are heard (or when their payload changes), and reports them lost
//! after a period of silence. A forgotten peer is reported again on its next
//! beacon.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use pagesync_core::{DiscoveryPayload, InstanceId, PeerId, ServiceDescriptor, PROTOCOL_VERSION};

use crate::error::{NetError, Result};
use crate::traits::{DiscoveredPeer, DiscoveryEvent, EventSender, NetEvent};

/// Largest beacon datagram accepted.
const MAX_BEACON_LEN: usize = 2048;

/// Presence announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub v: u8,
    pub descriptor: ServiceDescriptor,
    pub name: PeerId,
    pub instance: InstanceId,
    /// TCP port accepting invitations.
    pub port: u16,
    pub payload: DiscoveryPayload,
}

impl Beacon {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| NetError::Codec(e.to_string()))?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let beacon: Self =
            ciborium::from_reader(bytes).map_err(|e| NetError::Codec(e.to_string()))?;
        if beacon.v != PROTOCOL_VERSION {
            return Err(NetError::Codec(format!("beacon version {}", beacon.v)));
        }
        beacon
            .payload
            .validate_limits()
            .map_err(|e| NetError::Codec(e.to_string()))?;
        Ok(beacon)
    }
}

/// Broadcast `beacon` to `target` every `every` until the task is aborted.
pub(crate) async fn run_beacon(
    socket: UdpSocket,
    target: SocketAddr,
    beacon: Beacon,
    every: Duration,
) {
    let bytes = match beacon.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "beacon encoding failed");
            return;
        }
    };

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = socket.send_to(&bytes, target).await {
            // Interfaces come and go; keep beaconing.
            trace!(error = %e, %target, "beacon send failed");
        }
    }
}

struct SeenPeer {
    peer: DiscoveredPeer,
    payload: DiscoveryPayload,
    last_seen: Instant,
}

/// Tracks which peers a browser has reported.
pub(crate) struct PeerTable {
    descriptor: ServiceDescriptor,
    local: InstanceId,
    ttl: Duration,
    seen: HashMap<InstanceId, SeenPeer>,
}

impl PeerTable {
    pub(crate) fn new(descriptor: ServiceDescriptor, local: InstanceId, ttl: Duration) -> Self {
        Self {
            descriptor,
            local,
            ttl,
            seen: HashMap::new(),
        }
    }

    /// Record a beacon heard from `from`. Returns the event to report, if
    /// any.
    pub(crate) fn observe(
        &mut self,
        beacon: Beacon,
        from: SocketAddr,
        now: Instant,
    ) -> Option<DiscoveryEvent> {
        if beacon.descriptor != self.descriptor || beacon.instance == self.local {
            return None;
        }

        let peer = DiscoveredPeer {
            name: beacon.name,
            instance: beacon.instance,
            addr: Some(SocketAddr::new(from.ip(), beacon.port)),
        };

        match self.seen.get_mut(&beacon.instance) {
            Some(seen) if seen.payload == beacon.payload && seen.peer == peer => {
                seen.last_seen = now;
                None
            }
            _ => {
                self.seen.insert(
                    beacon.instance,
                    SeenPeer {
                        peer: peer.clone(),
                        payload: beacon.payload.clone(),
                        last_seen: now,
                    },
                );
                Some(DiscoveryEvent::PeerFound {
                    peer,
                    payload: beacon.payload,
                })
            }
        }
    }

    /// Stop tracking `instance` without reporting it lost. Returns whether it
    /// was tracked.
    pub(crate) fn forget(&mut self, instance: InstanceId) -> bool {
        self.seen.remove(&instance).is_some()
    }

    /// Drop peers not heard from within the TTL.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<DiscoveryEvent> {
        let ttl = self.ttl;
        let stale: Vec<InstanceId> = self
            .seen
            .iter()
            .filter(|(_, seen)| now.duration_since(seen.last_seen) >= ttl)
            .map(|(id, _)| *id)
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.seen.remove(&id))
            .map(|seen| DiscoveryEvent::PeerLost(seen.peer))
            .collect()
    }
}

/// Listen for beacons until the task is aborted.
pub(crate) async fn run_browser(
    socket: Arc<UdpSocket>,
    mut table: PeerTable,
    mut forget: mpsc::UnboundedReceiver<InstanceId>,
    events: EventSender,
) {
    let mut buf = vec![0u8; MAX_BEACON_LEN];
    let mut sweep = interval((table.ttl / 2).max(Duration::from_millis(100)));
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, from) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        trace!(error = %e, "beacon receive failed");
                        continue;
                    }
                };
                let beacon = match Beacon::from_bytes(&buf[..len]) {
                    Ok(beacon) => beacon,
                    Err(e) => {
                        trace!(error = %e, %from, "ignoring datagram");
                        continue;
                    }
                };
                if let Some(event) = table.observe(beacon, from, Instant::now()) {
                    if events.send(NetEvent::Discovery(event)).is_err() {
                        return;
                    }
                }
            }
            Some(instance) = forget.recv() => {
                if table.forget(instance) {
                    debug!(%instance, "peer forgotten");
                }
            }
            _ = sweep.tick() => {
                for event in table.expire(Instant::now()) {
                    if events.send(NetEvent::Discovery(event)).is_err() {
                        return;
                    }
                }
            }
        }
    }
}
