//! Starting, stopping, retrying and re-hosting a session.

use std::time::Duration;

use pagesync::{HostEvent, PeerId};
use pagesync_testkit::{connected_pair, init_tracing, PeerSpec, SyncFixture, TestPeer};

async fn eventually_advertising(fixture: &SyncFixture, peer: &TestPeer) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !fixture.is_advertising(peer).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peer never advertised");
}

fn count_status(peer: &TestPeer, needle: &str) -> usize {
    peer.status_messages()
        .iter()
        .filter(|text| text.contains(needle))
        .count()
}

#[tokio::test]
async fn test_start_deferred_without_value() {
    init_tracing();
    let fixture = SyncFixture::new();
    let mut a = fixture.peer(PeerSpec::new("a").no_value()).await;

    a.handle.start_syncing();
    a.wait_for_status("Waiting").await;
    assert!(!fixture.is_advertising(&a).await);

    a.state.set(1);
    a.handle.start_syncing();
    eventually_advertising(&fixture, &a).await;
}

#[tokio::test]
async fn test_advertise_failure_retried_once() {
    init_tracing();
    let fixture = SyncFixture::new();
    let mut a = fixture.peer(PeerSpec::new("a")).await;
    fixture.network.fail_next_advertise(a.instance, 1).await;

    a.handle.start_syncing();
    eventually_advertising(&fixture, &a).await;
    a.settle().await;
    assert_eq!(count_status(&a, "Advertising"), 0);
}

#[tokio::test]
async fn test_advertise_gives_up_after_second_failure() {
    init_tracing();
    let fixture = SyncFixture::new();
    let mut a = fixture.peer(PeerSpec::new("a")).await;
    fixture.network.fail_next_advertise(a.instance, 3).await;

    a.handle.start_syncing();
    a.wait_for_status("Advertising unavailable").await;
    a.settle().await;
    assert!(!fixture.is_advertising(&a).await);
    assert_eq!(count_status(&a, "Advertising"), 1);

    // A restart earns a fresh attempt and a fresh retry.
    a.handle.start_syncing();
    eventually_advertising(&fixture, &a).await;
    a.settle().await;
    assert_eq!(count_status(&a, "Advertising"), 1);
}

#[tokio::test]
async fn test_browse_gives_up_after_second_failure() {
    init_tracing();
    let fixture = SyncFixture::new();
    let mut a = fixture.peer(PeerSpec::new("a")).await;
    let mut b = fixture.peer(PeerSpec::new("b")).await;
    fixture.network.fail_next_browse(a.instance, 2).await;
    fixture.network.fail_next_browse(b.instance, 2).await;

    a.handle.start_syncing();
    b.handle.start_syncing();
    a.wait_for_status("Browsing unavailable").await;
    b.wait_for_status("Browsing unavailable").await;

    // Still advertising, but nobody is looking.
    a.settle().await;
    assert!(fixture.is_advertising(&a).await);
    assert_eq!(fixture.link_count(&a).await, 0);

    a.handle.start_syncing();
    a.wait_for_peers(1).await;
    b.wait_for_peers(1).await;
}

#[tokio::test]
async fn test_stale_retry_does_not_restart() {
    init_tracing();
    let fixture = SyncFixture::new();
    let mut a = fixture
        .peer(PeerSpec::new("a").retry_delay(Duration::from_millis(150)))
        .await;
    fixture.network.fail_next_advertise(a.instance, 1).await;

    a.handle.start_syncing();
    a.handle.stop_syncing();
    tokio::time::sleep(Duration::from_millis(400)).await;
    a.settle().await;

    assert!(!fixture.is_advertising(&a).await);
}

#[tokio::test]
async fn test_delayed_retry_succeeds() {
    init_tracing();
    let fixture = SyncFixture::new();
    let a = fixture
        .peer(PeerSpec::new("a").retry_delay(Duration::from_millis(50)))
        .await;
    fixture.network.fail_next_advertise(a.instance, 1).await;

    a.handle.start_syncing();
    eventually_advertising(&fixture, &a).await;
}

#[tokio::test]
async fn test_disconnect_then_restart_reconnects() {
    init_tracing();
    let (fixture, mut a, mut b) = connected_pair(PeerSpec::new("a"), PeerSpec::new("b")).await;

    a.handle.disconnect_from_peers();
    a.wait_for_peers(0).await;
    b.wait_for_peers(0).await;
    assert_eq!(fixture.link_count(&a).await, 0);
    // Discovery carries on.
    assert!(fixture.is_advertising(&a).await);

    a.handle.start_syncing();
    a.wait_for_peers(1).await;
    b.wait_for_peers(1).await;
}

#[tokio::test]
async fn test_update_hosting_drops_peers_and_readvertises() {
    init_tracing();
    let (fixture, mut a, mut b) = connected_pair(
        PeerSpec::new("a").page_count(10),
        PeerSpec::new("b").page_count(10),
    )
    .await;

    a.handle.update_hosting(12);
    a.wait_for_peers(0).await;
    b.wait_for_peers(0).await;
    a.settle().await;
    b.settle().await;

    // Payloads differ now, so nobody reconnects.
    assert_eq!(fixture.link_count(&a).await, 0);
    assert!(fixture.is_advertising(&a).await);

    b.handle.update_hosting(12);
    a.wait_for_peers(1).await;
    b.wait_for_peers(1).await;
}

#[tokio::test]
async fn test_update_hosting_starts_idle_session() {
    init_tracing();
    let fixture = SyncFixture::new();
    let mut a = fixture.peer(PeerSpec::new("a").page_count(10)).await;
    let mut b = fixture.peer(PeerSpec::new("b").page_count(12)).await;

    b.handle.start_syncing();
    eventually_advertising(&fixture, &b).await;
    assert!(!fixture.is_advertising(&a).await);

    a.handle.update_hosting(12);
    eventually_advertising(&fixture, &a).await;
    a.wait_for_peers(1).await;
    b.wait_for_peers(1).await;
}

#[tokio::test]
async fn test_link_completing_after_stop_is_dropped() {
    init_tracing();
    let fixture = SyncFixture::new();
    let mut a = fixture.peer(PeerSpec::new("a")).await;
    let (late_id, _late) = fixture.network.join(PeerId::new("late")).await;

    a.handle.start_syncing();
    eventually_advertising(&fixture, &a).await;
    a.handle.stop_syncing();
    tokio::time::timeout(Duration::from_secs(2), async {
        while fixture.is_advertising(&a).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peer never stopped advertising");

    // An invitation sent before the stop is accepted now.
    fixture.network.link(late_id, a.instance).await;

    tokio::time::timeout(Duration::from_secs(2), async {
        while fixture.network.link_count(late_id).await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("late link was kept");
    a.settle().await;

    assert_eq!(fixture.link_count(&a).await, 0);
    assert!(!a
        .seen()
        .iter()
        .any(|event| matches!(event, HostEvent::PeerSetChanged(peers) if !peers.is_empty())));
}

#[tokio::test]
async fn test_peer_lost_reported_as_status() {
    init_tracing();
    let (fixture, mut a, b) = connected_pair(PeerSpec::new("a"), PeerSpec::new("b")).await;

    // B stops advertising before it drops its links.
    b.handle.stop_syncing();
    let text = a.wait_for_status("no longer visible").await;
    assert_eq!(text, "b is no longer visible");
    a.wait_for_peers(0).await;

    assert_eq!(fixture.link_count(&a).await, 0);
    assert!(!fixture.is_advertising(&b).await);
}

#[tokio::test]
async fn test_shutdown_ends_session() {
    init_tracing();
    let (fixture, mut a, mut b) = connected_pair(PeerSpec::new("a"), PeerSpec::new("b")).await;

    a.handle.shutdown();
    b.wait_for_peers(0).await;
    while a.events.recv().await.is_some() {}

    assert!(!a.handle.is_running());
    assert!(!fixture.is_advertising(&a).await);
    assert!(b.handle.is_running());
}
