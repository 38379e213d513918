//! The boundary between a session and the app that hosts it.
//!
//! The host owns the current page. A session only reads it, through a
//! [`StateSource`], and proposes changes by sending [`HostEvent`]s. The host
//! drains [`HostEvents`] on whichever context it mutates its UI from.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::peers::PeerSet;

/// Read access to the host's current value.
pub trait StateSource: Send + Sync {
    /// The value being shown, or `None` when the host has nothing to sync
    /// yet.
    fn current_state_value(&self) -> Option<i64>;
}

impl<F> StateSource for F
where
    F: Fn() -> Option<i64> + Send + Sync,
{
    fn current_state_value(&self) -> Option<i64> {
        self()
    }
}

/// A current value shared between host and session.
///
/// Starts empty. `i64::MIN` is reserved to mean "nothing yet", so it can
/// never be stored: [`set`](Self::set) ignores it and [`clear`](Self::clear)
/// is the only way back to empty.
#[derive(Debug, Clone)]
pub struct SharedState(Arc<AtomicI64>);

const EMPTY: i64 = i64::MIN;

impl SharedState {
    pub fn new() -> Self {
        Self(Arc::new(AtomicI64::new(EMPTY)))
    }

    pub fn with_value(value: i64) -> Self {
        let state = Self::new();
        state.set(value);
        state
    }

    /// Store `value`. `i64::MIN` is not a page and is ignored.
    pub fn set(&self, value: i64) {
        if value == EMPTY {
            warn!("ignoring reserved value i64::MIN");
            return;
        }
        self.0.store(value, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(EMPTY, Ordering::SeqCst);
    }

    pub fn get(&self) -> Option<i64> {
        match self.0.load(Ordering::SeqCst) {
            EMPTY => None,
            value => Some(value),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl StateSource for SharedState {
    fn current_state_value(&self) -> Option<i64> {
        self.get()
    }
}

/// Notifications for the host, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A peer's value was adopted. The host should show it.
    PeerStateReceived(i64),
    /// The set of connected peers changed.
    PeerSetChanged(PeerSet),
    /// Informational text. Never needed for correctness.
    StatusMessage(String),
}

pub(crate) type HostSender = mpsc::UnboundedSender<HostEvent>;

/// Receiving end of a session's host notifications.
#[derive(Debug)]
pub struct HostEvents {
    rx: mpsc::UnboundedReceiver<HostEvent>,
}

impl HostEvents {
    pub(crate) fn channel() -> (HostSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Wait for the next event. `None` once the session has shut down and
    /// every event has been read.
    pub async fn recv(&mut self) -> Option<HostEvent> {
        self.rx.recv().await
    }

    /// Next event if one is queued.
    pub fn try_recv(&mut self) -> Option<HostEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_state() {
        let state = SharedState::new();
        assert_eq!(state.current_state_value(), None);

        let view = state.clone();
        state.set(4);
        assert_eq!(view.current_state_value(), Some(4));

        state.set(0);
        assert_eq!(view.get(), Some(0));

        state.clear();
        assert_eq!(view.get(), None);
    }

    #[test]
    fn test_reserved_value_not_stored() {
        let state = SharedState::with_value(3);
        state.set(i64::MIN);
        assert_eq!(state.get(), Some(3));

        let empty = SharedState::with_value(i64::MIN);
        assert_eq!(empty.get(), None);
        empty.set(-1);
        assert_eq!(empty.get(), Some(-1));
    }

    #[test]
    fn test_closure_source() {
        let source = || Some(7);
        assert_eq!(source.current_state_value(), Some(7));
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let (tx, mut events) = HostEvents::channel();
        tx.send(HostEvent::StatusMessage("a".into())).unwrap();
        tx.send(HostEvent::PeerStateReceived(2)).unwrap();

        assert_eq!(
            events.recv().await,
            Some(HostEvent::StatusMessage("a".into()))
        );
        assert_eq!(events.try_recv(), Some(HostEvent::PeerStateReceived(2)));
        assert_eq!(events.try_recv(), None);

        drop(tx);
        assert_eq!(events.recv().await, None);
    }
}
