//! Peer discovery
//!
//! Schema widening must be replayed on every peer node of the columnar
//! cluster. The writer only needs one capability from discovery: the current
//! set of peer endpoints, excluding the local node. Any subset of peers may
//! be unreachable at any time; the writer treats that as a warning.

use crate::store::Endpoint;
use crate::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Capability to enumerate peer columnar store nodes
#[async_trait]
pub trait PeerRegistry: Send + Sync {
    /// Current peer endpoints, excluding the local node.
    async fn peers(&self) -> Result<Vec<Endpoint>>;
}

/// Fixed peer set, updatable in place. Suitable for static deployments and
/// as an adapter for external watchers that push membership changes.
#[derive(Default)]
pub struct StaticPeerRegistry {
    peers: RwLock<Vec<Endpoint>>,
}

impl StaticPeerRegistry {
    pub fn new(peers: Vec<Endpoint>) -> Self {
        Self {
            peers: RwLock::new(peers),
        }
    }

    /// Replace the peer set.
    pub async fn set_peers(&self, peers: Vec<Endpoint>) {
        *self.peers.write().await = peers;
    }
}

#[async_trait]
impl PeerRegistry for StaticPeerRegistry {
    async fn peers(&self) -> Result<Vec<Endpoint>> {
        Ok(self.peers.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_registry_updates() {
        let registry = StaticPeerRegistry::default();
        assert!(registry.peers().await.unwrap().is_empty());

        registry
            .set_peers(vec![Endpoint::new("peer-1", 9000)])
            .await;
        let peers = registry.peers().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].to_string(), "peer-1:9000");
    }
}
