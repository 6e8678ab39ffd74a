//! Core identity types for the VeriDie protocol
//!
//! A peer is a remote participant on the radio link. Its stable radio
//! address is its identity; the display name is carried along for the UI
//! and never takes part in comparisons.

use std::borrow::Borrow;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Peer
// ----------------------------------------------------------------------------

/// A remote participant: stable radio address plus display name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    /// Stable radio address (opaque string, e.g. a MAC address)
    pub addr: String,
    /// Human-readable display name
    pub name: String,
}

impl Peer {
    /// Create a peer from an address and a display name
    pub fn new(addr: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            name: name.into(),
        }
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl PartialOrd for Peer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Peer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.addr.cmp(&other.addr)
    }
}

// Peer sets are keyed by address; this lets them be probed with a bare &str.
impl Borrow<str> for Peer {
    fn borrow(&self) -> &str {
        &self.addr
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_peer_identity_is_the_address() {
        let a = Peer::new("5c:b9:01:f8:b6:40", "Alice");
        let b = Peer::new("5c:b9:01:f8:b6:40", "Bob");
        let c = Peer::new("5c:b9:01:f8:b6:41", "Alice");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_peer_set_lookup_by_address() {
        let mut peers = HashSet::new();
        peers.insert(Peer::new("5c:b9:01:f8:b6:40", "Alice"));

        assert!(peers.contains("5c:b9:01:f8:b6:40"));
        assert!(!peers.contains("5c:b9:01:f8:b6:41"));

        let found = peers.get("5c:b9:01:f8:b6:40").unwrap();
        assert_eq!(found.name, "Alice");
    }

    #[test]
    fn test_peer_ordering_by_address() {
        let mut peers = vec![
            Peer::new("5c:b9:01:f8:b6:42", "C"),
            Peer::new("5c:b9:01:f8:b6:40", "A"),
            Peer::new("5c:b9:01:f8:b6:41", "B"),
        ];
        peers.sort();
        let addrs: Vec<&str> = peers.iter().map(|p| p.addr.as_str()).collect();
        assert_eq!(
            addrs,
            ["5c:b9:01:f8:b6:40", "5c:b9:01:f8:b6:41", "5c:b9:01:f8:b6:42"]
        );
    }
}
