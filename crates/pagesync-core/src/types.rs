//! Identity and time newtypes.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Longest display name a peer advertises, in bytes.
pub const MAX_PEER_NAME_LEN: usize = 63;

/// Fallback display name when neither configuration nor the environment
/// provides one.
const DEFAULT_PEER_NAME: &str = "pagesync";

/// Human-readable display name of a node.
///
/// Not unique: two devices may share a name. Sessions key peers by
/// [`PeerHandle`], never by name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Create from a display name, truncating overly long names on a char
    /// boundary. Blank names fall back to the default.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Self(DEFAULT_PEER_NAME.to_string());
        }

        let mut end = trimmed.len().min(MAX_PEER_NAME_LEN);
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        Self(trimmed[..end].to_string())
    }

    /// Name of this device, taken from the environment.
    pub fn from_device() -> Self {
        let name = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_default();
        Self::new(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({:?})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Random per-process identifier, used by network backends to tell apart
/// instances that share a display name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// Generate a random instance ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_be_bytes())
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.to_hex())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

/// A live connection to a peer.
///
/// Equality, hashing and ordering use the connection id only, so duplicate
/// display names remain distinct participants.
#[derive(Clone, Serialize, Deserialize)]
pub struct PeerHandle {
    id: u64,
    name: PeerId,
}

impl PeerHandle {
    pub fn new(id: u64, name: PeerId) -> Self {
        Self { id, name }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &PeerId {
        &self.name
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerHandle {}

impl Hash for PeerHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for PeerHandle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerHandle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerHandle({}#{})", self.name, self.id)
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time. Clocks set before the epoch read as zero.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self(millis)
    }

    pub const fn as_millis(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_peer_id_blank_falls_back() {
        assert_eq!(PeerId::new("   ").as_str(), "pagesync");
    }

    #[test]
    fn test_peer_id_truncates_on_char_boundary() {
        let long = "é".repeat(40);
        let id = PeerId::new(long);
        assert!(id.as_str().len() <= MAX_PEER_NAME_LEN);
        assert!(id.as_str().chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_peer_handle_keyed_by_id() {
        let a = PeerHandle::new(1, PeerId::new("iPad"));
        let b = PeerHandle::new(2, PeerId::new("iPad"));
        let a_again = PeerHandle::new(1, PeerId::new("renamed"));

        assert_ne!(a, b);
        assert_eq!(a, a_again);

        let set: HashSet<_> = [a, b, a_again].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp::from_millis(10) < Timestamp::from_millis(11));
        assert!(Timestamp::now() > Timestamp::from_millis(0));
    }

    #[test]
    fn test_instance_id_display() {
        let id = InstanceId(0xabcd_ef01_2345_6789);
        assert_eq!(format!("{}", id), "abcdef01");
        assert!(format!("{:?}", id).starts_with("InstanceId("));
    }
}
