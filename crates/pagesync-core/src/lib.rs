//! # pagesync Core
//!
//! Pure data types for the pagesync peer-synchronization protocol.
//!
//! This crate contains no I/O and no networking. It defines the identities,
//! discovery metadata and wire messages that every other pagesync crate
//! exchanges.
//!
//! ## Key Types
//!
//! - [`PeerId`] - Human-readable display name of a node
//! - [`PeerHandle`] - A live connection to a peer, keyed by connection id
//! - [`ServiceDescriptor`] - Short, protocol-legal service name shared by one app build
//! - [`DiscoveryPayload`] - Metadata attached to advertisements, used to filter peers
//! - [`StateMessage`] - The unit exchanged between connected peers
//!
//! ## Wire Format
//!
//! Messages are encoded as CBOR records. See the [`codec`] module.

pub mod codec;
pub mod descriptor;
pub mod duration;
pub mod error;
pub mod message;
pub mod payload;
pub mod types;

pub use codec::{decode_message, encode_message, MAX_FRAME_LEN, PROTOCOL_VERSION};
pub use descriptor::{ServiceDescriptor, ServiceIdentity, MAX_DESCRIPTOR_LEN};
pub use error::{ConfigError, CoreError};
pub use message::{MessageKind, StateMessage};
pub use payload::{DiscoveryPayload, PAGE_COUNT_KEY};
pub use types::{InstanceId, PeerHandle, PeerId, Timestamp};
