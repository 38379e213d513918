//! The set of connected peers.

use std::collections::BTreeSet;

use pagesync_core::{PeerHandle, PeerId};

/// Peers with a confirmed connection, ordered by connection id.
///
/// Two peers sharing a display name are still two entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSet(BTreeSet<PeerHandle>);

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer. Returns `false` if it was already present.
    pub fn insert(&mut self, peer: PeerHandle) -> bool {
        self.0.insert(peer)
    }

    /// Remove a peer. Returns `false` if it was not present.
    pub fn remove(&mut self, peer: &PeerHandle) -> bool {
        self.0.remove(peer)
    }

    /// Remove every peer. Returns `false` if the set was already empty.
    pub fn clear(&mut self) -> bool {
        let changed = !self.0.is_empty();
        self.0.clear();
        changed
    }

    pub fn contains(&self, peer: &PeerHandle) -> bool {
        self.0.contains(peer)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No peers connected. Drives the host's connection indicator.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerHandle> {
        self.0.iter()
    }

    /// Display names, in connection order.
    pub fn names(&self) -> Vec<PeerId> {
        self.0.iter().map(|peer| peer.name().clone()).collect()
    }

    pub fn to_vec(&self) -> Vec<PeerHandle> {
        self.0.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a PeerSet {
    type Item = &'a PeerHandle;
    type IntoIter = std::collections::btree_set::Iter<'a, PeerHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
