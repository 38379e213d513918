//! # pagesync
//!
//! Keeps the current page in step across instances of a presentation app
//! on the local network, with no server.
//!
//! ## Overview
//!
//! Each instance runs a session that advertises itself, browses for other
//! instances of the same app showing a document with the same page count,
//! and connects to them automatically. When two instances connect, the one
//! whose session started earlier decides the page. After that, any page
//! change on one instance is applied on all the others.
//!
//! ## Key Types
//!
//! - [`SessionBuilder`] - Validates identity and configuration, spawns the session
//! - [`SyncHandle`] - Fire-and-forget commands from the host
//! - [`HostEvents`] - Ordered [`HostEvent`]s back to the host
//! - [`StateSource`] - How the session reads the host's current page
//! - [`PeerSet`] - Who is connected
//!
//! ## Example
//!
//! ```rust,ignore
//! use pagesync::{MemoryNetwork, PeerId, ServiceIdentity, SessionBuilder, SharedState, SyncConfig};
//!
//! let network = MemoryNetwork::new();
//! let (_, parts) = network.join(PeerId::new("stage-left")).await;
//!
//! let page = SharedState::with_value(0);
//! let (handle, mut events) = SessionBuilder::new(
//!     ServiceIdentity::from_app_id("com.atomicbird.stumpslides"),
//!     page.clone(),
//! )
//! .config(SyncConfig { page_count: 24, ..Default::default() })
//! .spawn(parts);
//!
//! handle.start_syncing();
//! handle.send(3);
//! ```
//!
//! ## Failure Model
//!
//! Only an invalid service identity is fatal. Every network failure is
//! logged and absorbed; the host hears about connectivity through
//! [`HostEvent`]s alone.
//!
//! ## Re-exports
//!
//! - `pagesync::core` - Identities, descriptors, payloads, wire messages
//! - `pagesync::net` - Backend traits, in-memory network, LAN backend

pub mod advertiser;
pub mod browser;
pub mod config;
pub mod error;
pub mod host;
pub mod peers;
pub mod reconcile;
pub mod session;
pub mod transport;

pub use advertiser::DiscoveryAdvertiser;
pub use browser::{DiscoveryBrowser, Invitation};
pub use config::SyncConfig;
pub use error::{Result, SessionError};
pub use host::{HostEvent, HostEvents, SharedState, StateSource};
pub use peers::PeerSet;
pub use reconcile::{decide, Decision, IgnoreReason};
pub use session::{SessionBuilder, SyncHandle};
pub use transport::{PeerChange, SendOutcome, SessionTransport};

// Re-export component crates
pub use pagesync_core as core;
pub use pagesync_net as net;

// Re-export commonly used component types
pub use pagesync_core::{PeerHandle, PeerId, ServiceDescriptor, ServiceIdentity, Timestamp};
pub use pagesync_net::{LanConfig, MemoryNetwork, NetworkParts};
