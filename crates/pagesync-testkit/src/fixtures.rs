//! Test fixtures and helpers.
//!
//! Sessions on one shared [`MemoryNetwork`], each paired with a stand-in
//! host that records what it was told and shows every page it receives.

use std::sync::Arc;
use std::time::Duration;

use pagesync::{
    HostEvent, HostEvents, PeerSet, SessionBuilder, SharedState, SyncConfig, SyncHandle,
};
use pagesync_core::{InstanceId, PeerId, ServiceIdentity, Timestamp};
use pagesync_net::MemoryNetwork;
use tokio::time::{timeout, timeout_at, Instant};

/// How long a fixture waits for an expected event.
pub const WAIT: Duration = Duration::from_secs(2);

/// Silence after which a session is considered settled.
pub const QUIET: Duration = Duration::from_millis(100);

/// App identity every fixture session shares.
pub const APP_ID: &str = "com.atomicbird.stumpslides";

/// Install a fmt subscriber that writes through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// How to set up one fixture peer.
#[derive(Debug, Clone)]
pub struct PeerSpec {
    name: String,
    page_count: u32,
    value: Option<i64>,
    origin: Option<Timestamp>,
    retry_delay: Duration,
}

impl PeerSpec {
    /// Ten pages, showing page 0, started now.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            page_count: 10,
            value: Some(0),
            origin: None,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn page_count(mut self, page_count: u32) -> Self {
        self.page_count = page_count;
        self
    }

    pub fn value(mut self, value: i64) -> Self {
        self.value = Some(value);
        self
    }

    /// The host has nothing to show yet.
    pub fn no_value(mut self) -> Self {
        self.value = None;
        self
    }

    pub fn origin(mut self, millis: i64) -> Self {
        self.origin = Some(Timestamp::from_millis(millis));
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// A running session plus its stand-in host.
pub struct TestPeer {
    pub name: PeerId,
    pub instance: InstanceId,
    pub handle: SyncHandle,
    pub events: HostEvents,
    /// The host's current page.
    pub state: SharedState,
    seen: Vec<HostEvent>,
}

impl TestPeer {
    /// Record an event and react to it the way an app would.
    fn observe(&mut self, event: &HostEvent) {
        if let HostEvent::PeerStateReceived(value) = event {
            self.state.set(*value);
        }
        self.seen.push(event.clone());
    }

    /// Next event, or `None` after [`WAIT`] without one.
    pub async fn next_event(&mut self) -> Option<HostEvent> {
        let event = timeout(WAIT, self.events.recv()).await.ok().flatten()?;
        self.observe(&event);
        Some(event)
    }

    /// Read events until `pick` accepts one. Panics after [`WAIT`].
    pub async fn wait_for<T>(
        &mut self,
        what: &str,
        mut pick: impl FnMut(&HostEvent) -> Option<T>,
    ) -> T {
        let deadline = Instant::now() + WAIT;
        loop {
            match timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => {
                    self.observe(&event);
                    if let Some(found) = pick(&event) {
                        return found;
                    }
                }
                Ok(None) => panic!("{}: session ended waiting for {}", self.name, what),
                Err(_) => panic!("{}: timed out waiting for {}", self.name, what),
            }
        }
    }

    /// Wait until the peer set has `count` members.
    pub async fn wait_for_peers(&mut self, count: usize) -> PeerSet {
        self.wait_for(&format!("{} peers", count), |event| match event {
            HostEvent::PeerSetChanged(peers) if peers.len() == count => Some(peers.clone()),
            _ => None,
        })
        .await
    }

    /// Wait until `value` is received from a peer.
    pub async fn wait_for_value(&mut self, value: i64) {
        self.wait_for(&format!("value {}", value), |event| {
            (*event == HostEvent::PeerStateReceived(value)).then_some(())
        })
        .await
    }

    /// Wait for a status message containing `needle`.
    pub async fn wait_for_status(&mut self, needle: &str) -> String {
        self.wait_for(&format!("status containing {:?}", needle), |event| match event {
            HostEvent::StatusMessage(text) if text.contains(needle) => Some(text.clone()),
            _ => None,
        })
        .await
    }

    /// Read events until none arrive for [`QUIET`]. Returns what was read.
    pub async fn settle(&mut self) -> Vec<HostEvent> {
        let mut fresh = Vec::new();
        while let Ok(Some(event)) = timeout(QUIET, self.events.recv()).await {
            self.observe(&event);
            fresh.push(event);
        }
        fresh
    }

    /// Every event read so far.
    pub fn seen(&self) -> &[HostEvent] {
        &self.seen
    }

    /// Values received from peers, in order.
    pub fn received_values(&self) -> Vec<i64> {
        self.seen
            .iter()
            .filter_map(|event| match event {
                HostEvent::PeerStateReceived(value) => Some(*value),
                _ => None,
            })
            .collect()
    }

    pub fn status_messages(&self) -> Vec<String> {
        self.seen
            .iter()
            .filter_map(|event| match event {
                HostEvent::StatusMessage(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

/// A shared in-memory network to spawn sessions on.
pub struct SyncFixture {
    pub network: Arc<MemoryNetwork>,
}

impl SyncFixture {
    pub fn new() -> Self {
        Self {
            network: MemoryNetwork::new(),
        }
    }

    /// Join a node to the network and spawn a session on it. The session
    /// is idle until its handle starts it.
    pub async fn peer(&self, spec: PeerSpec) -> TestPeer {
        let name = PeerId::new(spec.name.as_str());
        let (instance, parts) = self.network.join(name.clone()).await;

        let state = match spec.value {
            Some(value) => SharedState::with_value(value),
            None => SharedState::new(),
        };
        let config = SyncConfig {
            page_count: spec.page_count,
            retry_delay: spec.retry_delay,
            ..Default::default()
        };

        let mut builder =
            SessionBuilder::new(ServiceIdentity::from_app_id(APP_ID), state.clone()).config(config);
        if let Some(origin) = spec.origin {
            builder = builder.origin_start_time(origin);
        }
        let (handle, events) = builder.spawn(parts);

        TestPeer {
            name,
            instance,
            handle,
            events,
            state,
            seen: Vec::new(),
        }
    }

    /// Frames `peer` has put on the wire.
    pub async fn sent_frames(&self, peer: &TestPeer) -> usize {
        self.network.sent_frames(peer.instance).await
    }

    pub async fn is_advertising(&self, peer: &TestPeer) -> bool {
        self.network.is_advertising(peer.instance).await
    }

    pub async fn link_count(&self, peer: &TestPeer) -> usize {
        self.network.link_count(peer.instance).await
    }
}

impl Default for SyncFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Create `count` idle peers with the same page count. Origins are one
/// second apart, in order, so the first peer started earliest.
pub async fn multi_peer_fixture(count: usize, page_count: u32) -> (SyncFixture, Vec<TestPeer>) {
    let fixture = SyncFixture::new();
    let base = Timestamp::now().as_millis();

    let mut peers = Vec::with_capacity(count);
    for i in 0..count {
        let spec = PeerSpec::new(&format!("peer-{}", i))
            .page_count(page_count)
            .origin(base + 1000 * i as i64);
        peers.push(fixture.peer(spec).await);
    }
    (fixture, peers)
}

/// Spawn two peers, start both, and wait until they are connected.
pub async fn connected_pair(a: PeerSpec, b: PeerSpec) -> (SyncFixture, TestPeer, TestPeer) {
    let fixture = SyncFixture::new();
    let mut a = fixture.peer(a).await;
    let mut b = fixture.peer(b).await;

    a.handle.start_syncing();
    b.handle.start_syncing();
    a.wait_for_peers(1).await;
    b.wait_for_peers(1).await;

    (fixture, a, b)
}
