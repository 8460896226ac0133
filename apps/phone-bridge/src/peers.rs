use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use transport_bus::PeerId;

/// Peers that explicitly sent a connect command. Shared between the router (which
/// mutates it from the message loop) and the publisher (which fans out to it).
#[derive(Clone, Default)]
pub struct ConnectedPeers {
    inner: Arc<RwLock<HashSet<PeerId>>>,
}

impl ConnectedPeers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the peer was not connected before.
    pub fn insert(&self, peer: &str) -> bool {
        self.inner.write().insert(peer.to_string())
    }

    pub fn remove(&self, peer: &str) -> bool {
        self.inner.write().remove(peer)
    }

    pub fn contains(&self, peer: &str) -> bool {
        self.inner.read().contains(peer)
    }

    /// Sorted copy, so fan-out order is stable.
    pub fn snapshot(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.inner.read().iter().cloned().collect();
        peers.sort();
        peers
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_is_shared_between_clones() {
        let peers = ConnectedPeers::new();
        let router_view = peers.clone();
        assert!(router_view.insert("watch-b"));
        assert!(!router_view.insert("watch-b"));
        router_view.insert("watch-a");

        assert_eq!(peers.snapshot(), ["watch-a", "watch-b"]);
        assert!(peers.remove("watch-b"));
        assert!(!peers.contains("watch-b"));
        assert_eq!(peers.len(), 1);
    }
}
