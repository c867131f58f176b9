//! Connected peer set
//!
//! Membership is keyed by remote address. Readers take a snapshot and
//! iterate it without holding the lock. Insertion and draining both take
//! the write lock, and insertion checks the caller's cancellation token
//! under that lock, so a peer admitted while the node stops is either
//! drained with the rest or rejected.

use crate::network::peer::{same_peer, Peer, PeerError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Default maximum number of connected peers
pub const DEFAULT_MAX_PEERS: usize = 10;

/// Concurrency-safe set of connected peers
pub struct PeerSet {
    peers: RwLock<HashMap<SocketAddr, Arc<dyn Peer>>>,
    max_peers: usize,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_PEERS)
    }

    pub fn with_capacity(max_peers: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            max_peers,
        }
    }

    /// Add a peer unless `generation` was already cancelled
    pub async fn insert(
        &self,
        peer: Arc<dyn Peer>,
        generation: &CancellationToken,
    ) -> Result<(), PeerError> {
        let mut peers = self.peers.write().await;

        if generation.is_cancelled() {
            return Err(PeerError::Closed);
        }
        let addr = peer.address();
        if peers.contains_key(&addr) {
            return Err(PeerError::AlreadyConnected(addr));
        }
        if peers.len() >= self.max_peers {
            return Err(PeerError::MaxPeersReached);
        }

        peers.insert(addr, peer);
        log::info!("Added peer: {} ({} connected)", addr, peers.len());
        Ok(())
    }

    /// Remove this exact peer. Returns false if it was not a member, for
    /// instance because `drain` already took it.
    pub async fn remove(&self, peer: &Arc<dyn Peer>) -> bool {
        let mut peers = self.peers.write().await;
        let addr = peer.address();
        match peers.get(&addr) {
            Some(existing) if same_peer(existing, peer) => {
                peers.remove(&addr);
                log::info!("Removed peer: {}", addr);
                true
            }
            _ => false,
        }
    }

    /// Take every peer out of the set
    pub async fn drain(&self) -> Vec<Arc<dyn Peer>> {
        let mut peers = self.peers.write().await;
        peers.drain().map(|(_, peer)| peer).collect()
    }

    /// Point-in-time copy of the members
    pub async fn snapshot(&self) -> Vec<Arc<dyn Peer>> {
        let peers = self.peers.read().await;
        peers.values().cloned().collect()
    }

    pub async fn addresses(&self) -> Vec<SocketAddr> {
        let peers = self.peers.read().await;
        peers.keys().copied().collect()
    }

    pub async fn contains(&self, addr: &SocketAddr) -> bool {
        self.peers.read().await.contains_key(addr)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

impl Default for PeerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::MockPeer;

    #[tokio::test]
    async fn test_insert_and_remove() {
        let set = PeerSet::new();
        let token = CancellationToken::new();
        let peer: Arc<dyn Peer> = MockPeer::new(1001);

        set.insert(peer.clone(), &token).await.unwrap();
        assert_eq!(set.len().await, 1);
        assert!(set.contains(&peer.address()).await);

        assert!(set.remove(&peer).await);
        assert!(!set.remove(&peer).await);
        assert!(set.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_address_rejected() {
        let set = PeerSet::new();
        let token = CancellationToken::new();
        let first: Arc<dyn Peer> = MockPeer::new(1001);
        let second: Arc<dyn Peer> = MockPeer::new(1001);

        set.insert(first.clone(), &token).await.unwrap();
        assert!(matches!(
            set.insert(second.clone(), &token).await,
            Err(PeerError::AlreadyConnected(_))
        ));
        // Removing the impostor must not evict the member
        assert!(!set.remove(&second).await);
        assert_eq!(set.len().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let set = PeerSet::with_capacity(1);
        let token = CancellationToken::new();
        set.insert(MockPeer::new(1001), &token).await.unwrap();
        assert!(matches!(
            set.insert(MockPeer::new(1002), &token).await,
            Err(PeerError::MaxPeersReached)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_generation_rejected() {
        let set = PeerSet::new();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            set.insert(MockPeer::new(1001), &token).await,
            Err(PeerError::Closed)
        ));
        assert!(set.is_empty().await);
    }

    #[tokio::test]
    async fn test_drain_empties_set() {
        let set = PeerSet::new();
        let token = CancellationToken::new();
        for port in 1001..1004 {
            set.insert(MockPeer::new(port), &token).await.unwrap();
        }
        let snapshot = set.snapshot().await;
        let drained = set.drain().await;
        assert_eq!(drained.len(), 3);
        assert_eq!(snapshot.len(), 3);
        assert!(set.is_empty().await);
        assert!(set.drain().await.is_empty());
    }
}
