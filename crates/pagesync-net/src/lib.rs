//! # pagesync Net
//!
//! Discovery and transport backends for pagesync.
//!
//! A node on the network plays three roles, each behind a trait:
//!
//! - [`AdvertiseBackend`] - announce presence under a service descriptor
//! - [`BrowseBackend`] - find advertisers and invite them
//! - [`TransportBackend`] - move frames between connected peers
//!
//! Everything the network reports back arrives as [`NetEvent`]s on the
//! receiver in [`NetworkParts`].
//!
//! ## Backends
//!
//! - [`memory::MemoryNetwork`] - in-process, for tests, with failure injection
//! - [`lan::LanNode`] - UDP beacons plus TCP links on the local network

pub mod error;
pub mod lan;
pub mod memory;
pub mod traits;

pub use error::{NetError, Result};
pub use lan::{LanConfig, LanNode};
pub use memory::{MemoryNetwork, MemoryNode};
pub use traits::{
    AdvertiseBackend, BrowseBackend, ConnectionState, DiscoveredPeer, DiscoveryEvent,
    EventReceiver, EventSender, NetEvent, NetworkParts, TransportBackend, DEFAULT_INVITE_TIMEOUT,
};
