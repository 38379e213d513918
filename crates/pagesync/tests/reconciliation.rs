//! Connected peers agree on one page.

use pagesync::{HostEvent, PeerHandle, PeerId, Timestamp};
use pagesync_core::{encode_message, StateMessage};
use pagesync_testkit::{connected_pair, init_tracing, multi_peer_fixture, PeerSpec, SyncFixture};

use bytes::Bytes;

fn ghost() -> PeerHandle {
    PeerHandle::new(9_999, PeerId::new("ghost"))
}

fn wire(message: StateMessage) -> Bytes {
    encode_message(&message).unwrap()
}

#[tokio::test]
async fn test_mismatched_payloads_never_connect() {
    init_tracing();
    let fixture = SyncFixture::new();
    let mut a = fixture.peer(PeerSpec::new("a").page_count(10)).await;
    let mut b = fixture.peer(PeerSpec::new("b").page_count(12)).await;

    a.handle.start_syncing();
    b.handle.start_syncing();
    a.settle().await;
    b.settle().await;

    assert_eq!(fixture.link_count(&a).await, 0);
    assert_eq!(fixture.link_count(&b).await, 0);
    for peer in [&a, &b] {
        assert!(!peer
            .seen()
            .iter()
            .any(|e| matches!(e, HostEvent::PeerSetChanged(_))));
    }
}

#[tokio::test]
async fn test_each_side_sends_one_connection_sync() {
    init_tracing();
    let (fixture, mut a, mut b) = connected_pair(PeerSpec::new("a"), PeerSpec::new("b")).await;
    a.settle().await;
    b.settle().await;

    assert_eq!(fixture.sent_frames(&a).await, 1);
    assert_eq!(fixture.sent_frames(&b).await, 1);
}

#[tokio::test]
async fn test_earlier_origin_wins() {
    init_tracing();
    let t0 = 1_700_000_000_000;
    let (_, mut a, mut b) = connected_pair(
        PeerSpec::new("a").value(3).origin(t0),
        PeerSpec::new("b").value(7).origin(t0 + 1_000),
    )
    .await;

    b.wait_for_value(3).await;
    a.settle().await;
    b.settle().await;

    assert_eq!(a.state.get(), Some(3));
    assert_eq!(b.state.get(), Some(3));
    assert!(a.received_values().is_empty());
}

#[tokio::test]
async fn test_same_value_sent_once() {
    init_tracing();
    let (fixture, mut a, mut b) = connected_pair(PeerSpec::new("a"), PeerSpec::new("b")).await;
    a.settle().await;
    b.settle().await;
    let before = fixture.sent_frames(&a).await;

    a.handle.send(5);
    a.handle.send(5);
    b.wait_for_value(5).await;
    a.settle().await;
    b.settle().await;

    assert_eq!(fixture.sent_frames(&a).await, before + 1);
    assert_eq!(b.received_values().iter().filter(|v| **v == 5).count(), 1);
}

#[tokio::test]
async fn test_adopted_value_not_echoed() {
    init_tracing();
    let (fixture, mut a, mut b) = connected_pair(PeerSpec::new("a"), PeerSpec::new("b")).await;
    a.settle().await;
    b.settle().await;

    a.handle.send(6);
    b.wait_for_value(6).await;
    let before = fixture.sent_frames(&b).await;

    // The host shows the page it was told about, then reports it back.
    b.handle.send(6);
    b.settle().await;
    a.settle().await;

    assert_eq!(fixture.sent_frames(&b).await, before);
    assert!(a.received_values().is_empty());
}

#[tokio::test]
async fn test_state_change_adopted_while_alone() {
    init_tracing();
    let fixture = SyncFixture::new();
    let mut a = fixture.peer(PeerSpec::new("a")).await;
    a.handle.start_syncing();
    a.settle().await;

    fixture
        .network
        .deliver(
            a.instance,
            ghost(),
            wire(StateMessage::state_change(4, Timestamp::from_millis(1))),
        )
        .await;

    a.wait_for_value(4).await;
    assert!(a.handle.is_running());
    assert!(!a
        .seen()
        .iter()
        .any(|e| matches!(e, HostEvent::PeerSetChanged(_))));
}

#[tokio::test]
async fn test_malformed_data_changes_nothing() {
    init_tracing();
    let (fixture, mut a, mut b) = connected_pair(PeerSpec::new("a"), PeerSpec::new("b")).await;
    a.settle().await;
    b.settle().await;

    let junk: [&[u8]; 3] = [b"\x00", b"not cbor at all", b"\xa1\x61v\x18\x63"];
    for junk in junk {
        fixture
            .network
            .deliver(a.instance, ghost(), Bytes::copy_from_slice(junk))
            .await;
    }
    assert!(a.settle().await.is_empty());
    assert_eq!(fixture.link_count(&a).await, 1);

    // The last sent value is intact: resending it is still a no-op.
    let before = fixture.sent_frames(&a).await;
    a.handle.send(0);
    a.settle().await;
    assert_eq!(fixture.sent_frames(&a).await, before);

    a.handle.send(1);
    b.wait_for_value(1).await;
}

#[tokio::test]
async fn test_out_of_range_value_ignored() {
    init_tracing();
    let fixture = SyncFixture::new();
    let mut a = fixture.peer(PeerSpec::new("a").page_count(10)).await;
    a.handle.start_syncing();
    a.settle().await;

    for value in [10, 42, -1] {
        fixture
            .network
            .deliver(
                a.instance,
                ghost(),
                wire(StateMessage::state_change(value, Timestamp::from_millis(1))),
            )
            .await;
    }

    assert!(a.settle().await.is_empty());
    assert_eq!(a.state.get(), Some(0));
}

#[tokio::test]
async fn test_later_origin_connection_sync_ignored() {
    init_tracing();
    let fixture = SyncFixture::new();
    let mut a = fixture.peer(PeerSpec::new("a").origin(1_000)).await;
    a.handle.start_syncing();
    a.settle().await;

    let late = StateMessage::connection_sync(8, Timestamp::from_millis(2_000));
    fixture.network.deliver(a.instance, ghost(), wire(late)).await;
    assert!(a.settle().await.is_empty());

    let early = StateMessage::connection_sync(8, Timestamp::from_millis(500));
    fixture.network.deliver(a.instance, ghost(), wire(early)).await;
    a.wait_for_value(8).await;
}

#[tokio::test]
async fn test_change_reaches_whole_mesh() {
    init_tracing();
    let (_, mut peers) = multi_peer_fixture(3, 10).await;
    for peer in &peers {
        peer.handle.start_syncing();
    }
    for peer in peers.iter_mut() {
        peer.wait_for_peers(2).await;
    }
    for peer in peers.iter_mut() {
        peer.settle().await;
    }

    peers[2].handle.send(7);
    peers[0].wait_for_value(7).await;
    peers[1].wait_for_value(7).await;
}
