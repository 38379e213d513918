//! State messages exchanged between connected peers.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Why a state message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    /// Sent once per newly connected peer. The receiver adopts the value
    /// only if the sender's session started earlier.
    ConnectionSync,
    /// A deliberate local change. Receivers adopt it unconditionally.
    StateChange,
}

/// The unit sent over the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateMessage {
    /// The logical current page.
    pub value: i64,
    /// When the sending instance began its logical session.
    pub origin_start_time: Timestamp,
    pub kind: MessageKind,
}

impl StateMessage {
    pub fn connection_sync(value: i64, origin_start_time: Timestamp) -> Self {
        Self {
            value,
            origin_start_time,
            kind: MessageKind::ConnectionSync,
        }
    }

    pub fn state_change(value: i64, origin_start_time: Timestamp) -> Self {
        Self {
            value,
            origin_start_time,
            kind: MessageKind::StateChange,
        }
    }

    /// Whether `value` indexes into a document with `count` pages.
    pub fn is_within(&self, count: u32) -> bool {
        self.value >= 0 && self.value < i64::from(count)
    }
}
