//! CBOR wire encoding for state messages.
//!
//! Each message is a single CBOR map:
//!
//! ```text
//! { "v": u8, "value": i64, "origin": i64, "kind": "connectionSync" | "stateChange" }
//! ```
//!
//! Stream transports wrap each record in a 4-byte big-endian length prefix
//! (see `pagesync-net`). Only peers of the same protocol version can talk;
//! anything else fails to decode and is dropped by the receiver.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::message::{MessageKind, StateMessage};
use crate::types::Timestamp;

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest frame a transport accepts.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Serialize, Deserialize)]
struct WireRecord {
    v: u8,
    value: i64,
    origin: i64,
    kind: MessageKind,
}

/// Encode a message to CBOR bytes.
pub fn encode_message(message: &StateMessage) -> Result<Bytes, CoreError> {
    let record = WireRecord {
        v: PROTOCOL_VERSION,
        value: message.value,
        origin: message.origin_start_time.as_millis(),
        kind: message.kind,
    };

    let mut buf = Vec::with_capacity(48);
    ciborium::into_writer(&record, &mut buf).map_err(|e| CoreError::Encoding(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Decode a message from CBOR bytes.
///
/// Rejects oversized input, malformed CBOR, trailing bytes and records from
/// another protocol version.
pub fn decode_message(bytes: &[u8]) -> Result<StateMessage, CoreError> {
    if bytes.len() > MAX_FRAME_LEN {
        return Err(CoreError::Decoding(format!("frame of {} bytes", bytes.len())));
    }

    let mut cursor = std::io::Cursor::new(bytes);
    let record: WireRecord =
        ciborium::from_reader(&mut cursor).map_err(|e| CoreError::Decoding(e.to_string()))?;

    if cursor.position() as usize != bytes.len() {
        return Err(CoreError::Decoding("trailing bytes after record".into()));
    }
    if record.v != PROTOCOL_VERSION {
        return Err(CoreError::UnsupportedVersion(record.v));
    }

    Ok(StateMessage {
        value: record.value,
        origin_start_time: Timestamp::from_millis(record.origin),
        kind: record.kind,
    })
}
