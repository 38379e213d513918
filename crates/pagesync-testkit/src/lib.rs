//! # pagesync Testkit
//!
//! Testing utilities for pagesync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Sessions on a shared in-memory network, with a host stand-in
//!   that records events and applies received pages
//! - **Generators**: Proptest strategies for identifiers, payloads and messages
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use pagesync_testkit::fixtures::{SyncFixture, PeerSpec};
//!
//! let fixture = SyncFixture::new();
//! let mut a = fixture.peer(PeerSpec::new("a").value(3)).await;
//! let mut b = fixture.peer(PeerSpec::new("b").value(7)).await;
//! a.handle.start_syncing();
//! b.handle.start_syncing();
//! a.wait_for_peers(1).await;
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use pagesync_testkit::generators::{app_id, StateMessageParams};
//!
//! proptest! {
//!     #[test]
//!     fn derive_is_total(raw in app_id()) {
//!         let _ = ServiceDescriptor::derive(&raw);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{connected_pair, init_tracing, multi_peer_fixture, PeerSpec, SyncFixture, TestPeer};
pub use generators::{state_message_from_params, StateMessageParams};
