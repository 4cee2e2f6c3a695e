//! Read-only view of the peer table for the caller's thread.
//!
//! The worker owns every peer connection. After each transition it publishes
//! the new state here so that `send` and friends can answer synchronously
//! with `UnknownPeer` or `NotConnected` without touching worker state.

use crate::types::{ConnectionState, PeerId, RemoteAddr};
use dashmap::DashMap;

/// Traffic counters for one peer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerStats {
    /// Total bytes received
    pub bytes_in: u64,
    /// Total bytes sent
    pub bytes_out: u64,
    /// Number of frames received
    pub frames_received: u64,
    /// Number of frames queued for sending
    pub frames_sent: u64,
    /// Number of successful handshakes
    pub connects: u64,
}

/// Snapshot of one peer as seen from the caller's thread
#[derive(Clone, Debug)]
pub struct PeerInfo {
    /// Peer handle
    pub id: PeerId,
    /// Where the peer lives
    pub remote: RemoteAddr,
    /// Last published state
    pub state: ConnectionState,
    /// Failed retries since the link was lost
    pub reconnect_attempts: u32,
    /// Traffic counters
    pub stats: PeerStats,
}

/// Shared peer status table
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: DashMap<PeerId, PeerInfo>,
}

impl PeerDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer that was just requested
    pub fn register(&self, id: PeerId, remote: RemoteAddr) {
        self.peers.insert(
            id,
            PeerInfo {
                id,
                remote,
                state: ConnectionState::Connecting,
                reconnect_attempts: 0,
                stats: PeerStats::default(),
            },
        );
    }

    /// Forget a peer. Returns whether it was known.
    pub fn remove(&self, id: PeerId) -> bool {
        self.peers.remove(&id).is_some()
    }

    /// Whether the peer is tracked
    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Current state of a peer
    pub fn state(&self, id: PeerId) -> Option<ConnectionState> {
        self.peers.get(&id).map(|entry| entry.state)
    }

    /// Snapshot of a peer
    pub fn info(&self, id: PeerId) -> Option<PeerInfo> {
        self.peers.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every tracked peer, ordered by ID
    pub fn all(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self.peers.iter().map(|entry| entry.value().clone()).collect();
        peers.sort_by_key(|info| info.id);
        peers
    }

    /// Number of tracked peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer is tracked
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Publish new state. A removed peer is never resurrected.
    pub fn publish(&self, id: PeerId, state: ConnectionState, attempts: u32, stats: &PeerStats) {
        if let Some(mut entry) = self.peers.get_mut(&id) {
            entry.state = state;
            entry.reconnect_attempts = attempts;
            entry.stats = stats.clone();
        }
    }

    /// Mark every peer as going down
    pub fn mark_all_shutting_down(&self) {
        for mut entry in self.peers.iter_mut() {
            entry.state = ConnectionState::ShuttingDown;
        }
    }

    /// Forget every peer
    pub fn clear(&self) {
        self.peers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> RemoteAddr {
        RemoteAddr::new("127.0.0.1", 9000).unwrap()
    }

    #[test]
    fn test_register_and_publish() {
        let dir = PeerDirectory::new();
        dir.register(PeerId(1), addr());
        assert_eq!(dir.state(PeerId(1)), Some(ConnectionState::Connecting));

        let stats = PeerStats {
            connects: 1,
            ..Default::default()
        };
        dir.publish(PeerId(1), ConnectionState::Connected, 0, &stats);
        let info = dir.info(PeerId(1)).unwrap();
        assert_eq!(info.state, ConnectionState::Connected);
        assert_eq!(info.stats.connects, 1);
    }

    #[test]
    fn test_publish_does_not_resurrect() {
        let dir = PeerDirectory::new();
        dir.register(PeerId(1), addr());
        assert!(dir.remove(PeerId(1)));
        dir.publish(PeerId(1), ConnectionState::Connected, 0, &PeerStats::default());
        assert!(!dir.contains(PeerId(1)));
        assert!(!dir.remove(PeerId(1)));
    }

    #[test]
    fn test_all_sorted() {
        let dir = PeerDirectory::new();
        dir.register(PeerId(3), addr());
        dir.register(PeerId(1), addr());
        let ids: Vec<PeerId> = dir.all().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![PeerId(1), PeerId(3)]);

        dir.mark_all_shutting_down();
        assert_eq!(dir.state(PeerId(3)), Some(ConnectionState::ShuttingDown));
        dir.clear();
        assert!(dir.is_empty());
    }
}
