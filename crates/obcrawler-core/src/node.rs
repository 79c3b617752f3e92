//! The abstract shape of the embedded content-addressed node runtime.
//!
//! Everything in this module is a contract, not an implementation: the real
//! DHT, gossip transport, and block store live in an embedded node process
//! outside this crate's scope. [`Node`] names exactly the operations the
//! crawl engine needs from it; [`NodePool`] is the thin façade the rest of
//! the engine is written against so tests can swap in an in-memory stand-in.

use async_trait::async_trait;
use cid::Cid;
use libipld::Ipld;
use libp2p_identity::PeerId;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The quorum-bounded DHT lookup and pub/sub/pin surface a single pool
/// instance must expose. Method names and shapes follow spec section 6.
#[async_trait]
pub trait Node: Send + Sync {
    /// This node's own identity, for logging and self-filtering.
    fn local_peer_id(&self) -> PeerId;

    /// `Routing.GetValue(key, quorum)`.
    async fn routing_get_value(&self, key: &[u8], quorum: usize) -> Result<Vec<u8>, NodeError>;

    /// `Routing.PutValue(key, record)`.
    async fn routing_put_value(&self, key: &[u8], record: Vec<u8>) -> Result<(), NodeError>;

    /// `Routing.FindPeer(pid)`. Returns `Ok(None)` on a clean not-found.
    async fn routing_find_peer(&self, peer: PeerId) -> Result<Option<Vec<u8>>, NodeError>;

    /// `Dag.Get(cid)`, bounded by `timeout`.
    async fn dag_get(&self, cid: Cid, timeout: Duration) -> Result<Ipld, NodeError>;

    /// `File.Get(path)`, bounded by `timeout`. `path` is the root-relative
    /// path resolved under the peer's root node (e.g. `profile.json`).
    async fn file_get(&self, root: Cid, path: &str, timeout: Duration)
        -> Result<Vec<u8>, NodeError>;

    /// Fetch a signed listing document addressed directly by its own CID.
    async fn get_listing(&self, cid: Cid, timeout: Duration) -> Result<Vec<u8>, NodeError>;

    /// `Pin.Add(cid, recursive)`.
    async fn pin_add(&self, cid: Cid, recursive: bool, timeout: Duration) -> Result<(), NodeError>;

    /// `Pin.Remove(cid)`.
    async fn pin_remove(&self, cid: Cid) -> Result<(), NodeError>;

    /// `GarbageCollect(async)`.
    async fn garbage_collect(&self) -> Result<(), NodeError>;

    /// `PubSub.Subscribe(topic, discover=true)`, returning a stream of
    /// `(sender, payload)` pairs. Each call opens an independent
    /// subscription; the gossip listener opens one per pool node.
    async fn subscribe(&self, topic: &str) -> Result<PubsubSubscription, NodeError>;

    /// Publish `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NodeError>;
}

/// A live pub/sub subscription: messages arrive on `messages` until the
/// underlying node runtime tears it down or the receiver is dropped.
pub struct PubsubSubscription {
    pub messages: tokio::sync::mpsc::Receiver<GossipMessage>,
}

#[derive(Debug, Clone)]
pub struct GossipMessage {
    pub sender: PeerId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("value not found")]
    NotFound,
    #[error("operation timed out")]
    Timeout,
    #[error("node operation failed: {0}")]
    Other(String),
}

/// A connect/disconnect event observed on one pool node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(PeerId),
    Disconnected(PeerId),
}

/// The pool of `N` embedded node instances. The crawl engine is written
/// entirely against this façade — individual [`Node`]s are never addressed
/// directly outside of it, matching the "multi-node pool as dependency
/// injection" design note: one mock node behind the same façade is enough to
/// exercise the whole engine in tests.
#[derive(Clone)]
pub struct NodePool {
    nodes: Arc<Vec<Arc<dyn Node>>>,
}

impl NodePool {
    pub fn new(nodes: Vec<Arc<dyn Node>>) -> Self {
        assert!(!nodes.is_empty(), "node pool must not be empty");
        Self {
            nodes: Arc::new(nodes),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, e.g. for fan-out operations like best-effort unpin or GC.
    pub fn all(&self) -> &[Arc<dyn Node>] {
        &self.nodes
    }

    /// The first `k` nodes, used for the gossip listener's pub/sub subset.
    pub fn first(&self, k: usize) -> &[Arc<dyn Node>] {
        let k = k.min(self.nodes.len());
        &self.nodes[..k]
    }

    /// Pick one node at random to serve an entire job, per spec 4.4's
    /// "stable locality" guidance.
    pub fn pick_one(&self) -> Arc<dyn Node> {
        let mut rng = rand::thread_rng();
        self.nodes
            .choose(&mut rng)
            .expect("node pool is never empty")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(PeerId);

    #[async_trait]
    impl Node for Dummy {
        fn local_peer_id(&self) -> PeerId {
            self.0
        }
        async fn routing_get_value(&self, _: &[u8], _: usize) -> Result<Vec<u8>, NodeError> {
            Err(NodeError::NotFound)
        }
        async fn routing_put_value(&self, _: &[u8], _: Vec<u8>) -> Result<(), NodeError> {
            Ok(())
        }
        async fn routing_find_peer(&self, _: PeerId) -> Result<Option<Vec<u8>>, NodeError> {
            Ok(None)
        }
        async fn dag_get(&self, _: Cid, _: Duration) -> Result<Ipld, NodeError> {
            Err(NodeError::NotFound)
        }
        async fn file_get(&self, _: Cid, _: &str, _: Duration) -> Result<Vec<u8>, NodeError> {
            Err(NodeError::NotFound)
        }
        async fn get_listing(&self, _: Cid, _: Duration) -> Result<Vec<u8>, NodeError> {
            Err(NodeError::NotFound)
        }
        async fn pin_add(&self, _: Cid, _: bool, _: Duration) -> Result<(), NodeError> {
            Ok(())
        }
        async fn pin_remove(&self, _: Cid) -> Result<(), NodeError> {
            Ok(())
        }
        async fn garbage_collect(&self) -> Result<(), NodeError> {
            Ok(())
        }
        async fn subscribe(&self, _: &str) -> Result<PubsubSubscription, NodeError> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(PubsubSubscription { messages: rx })
        }
        async fn publish(&self, _: &str, _: Vec<u8>) -> Result<(), NodeError> {
            Ok(())
        }
    }

    #[test]
    #[should_panic(expected = "must not be empty")]
    fn rejects_empty_pool() {
        NodePool::new(vec![]);
    }

    #[test]
    fn first_caps_at_pool_size() {
        let a: Arc<dyn Node> = Arc::new(Dummy(PeerId::random()));
        let b: Arc<dyn Node> = Arc::new(Dummy(PeerId::random()));
        let pool = NodePool::new(vec![a, b]);
        assert_eq!(pool.first(10).len(), 2);
        assert_eq!(pool.first(1).len(), 1);
    }
}
