//! Which incoming values a session adopts.
//!
//! - `ConnectionSync`: the session that started earliest wins. Ties keep
//!   the local value.
//! - `StateChange`: last write wins.
//!
//! Either way a value outside the document is ignored.
//!
//! With three or more peers connecting at once, in-flight messages can
//! interleave so the group settles on a value that is not the earliest
//! origin's. Pairs always agree.

use pagesync_core::{MessageKind, StateMessage, Timestamp};

/// Outcome of reconciling one incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Adopt(i64),
    Ignore(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The local session started no later than the sender's.
    LocalOriginWins,
    /// The value does not index into the document.
    OutOfRange,
}

/// Decide what to do with `message` given the local origin and page count.
pub fn decide(message: &StateMessage, local_origin: Timestamp, page_count: u32) -> Decision {
    if message.kind == MessageKind::ConnectionSync && message.origin_start_time >= local_origin {
        return Decision::Ignore(IgnoreReason::LocalOriginWins);
    }
    if !message.is_within(page_count) {
        return Decision::Ignore(IgnoreReason::OutOfRange);
    }
    Decision::Adopt(message.value)
}
