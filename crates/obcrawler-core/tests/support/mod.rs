//! In-memory stand-in for the embedded content-addressed node runtime,
//! playing the role the teacher's `tests/store/mod.rs` `TestBlockstore`
//! plays for Bitswap: enough of the real contract to drive the crawl
//! engine end to end without any real libp2p/DHT machinery.

use async_trait::async_trait;
use cid::Cid;
use libipld::Ipld;
use libp2p_identity::{Keypair, PeerId};
use obcrawler_core::ipns::MutableNameRecord;
use obcrawler_core::node::{GossipMessage, Node, NodeError, NodePool, PubsubSubscription};
use obcrawler_core::signed_record::SignedRecord;
use obcrawler_core::timestamp::Timestamp;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

#[derive(Default)]
pub struct MockSwarm {
    pub dag: HashMap<Cid, Ipld>,
    pub files: HashMap<(Cid, String), Vec<u8>>,
    pub listings: HashMap<Cid, Vec<u8>>,
    pub dht: HashMap<Vec<u8>, Vec<u8>>,
    pub pinned: HashSet<Cid>,
    pub unpin_log: Vec<Cid>,
    pub topics: HashMap<String, Vec<mpsc::Sender<GossipMessage>>>,
    /// When set, `routing_put_value` fails every call, simulating a
    /// transient DHT republish error.
    pub fail_put_value: bool,
}

pub struct MockNode {
    peer_id: PeerId,
    swarm: Arc<Mutex<MockSwarm>>,
}

impl MockNode {
    pub fn new(peer_id: PeerId, swarm: Arc<Mutex<MockSwarm>>) -> Self {
        Self { peer_id, swarm }
    }
}

#[async_trait]
impl Node for MockNode {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn routing_get_value(&self, key: &[u8], _quorum: usize) -> Result<Vec<u8>, NodeError> {
        self.swarm
            .lock()
            .await
            .dht
            .get(key)
            .cloned()
            .ok_or(NodeError::NotFound)
    }

    async fn routing_put_value(&self, key: &[u8], record: Vec<u8>) -> Result<(), NodeError> {
        let mut swarm = self.swarm.lock().await;
        if swarm.fail_put_value {
            return Err(NodeError::Other("simulated dht put failure".to_string()));
        }
        swarm.dht.insert(key.to_vec(), record);
        Ok(())
    }

    async fn routing_find_peer(&self, _peer: PeerId) -> Result<Option<Vec<u8>>, NodeError> {
        Ok(None)
    }

    async fn dag_get(&self, cid: Cid, _timeout: Duration) -> Result<Ipld, NodeError> {
        self.swarm
            .lock()
            .await
            .dag
            .get(&cid)
            .cloned()
            .ok_or(NodeError::NotFound)
    }

    async fn file_get(
        &self,
        root: Cid,
        path: &str,
        _timeout: Duration,
    ) -> Result<Vec<u8>, NodeError> {
        self.swarm
            .lock()
            .await
            .files
            .get(&(root, path.to_string()))
            .cloned()
            .ok_or(NodeError::NotFound)
    }

    async fn get_listing(&self, cid: Cid, _timeout: Duration) -> Result<Vec<u8>, NodeError> {
        self.swarm
            .lock()
            .await
            .listings
            .get(&cid)
            .cloned()
            .ok_or(NodeError::NotFound)
    }

    async fn pin_add(&self, cid: Cid, _recursive: bool, _timeout: Duration) -> Result<(), NodeError> {
        self.swarm.lock().await.pinned.insert(cid);
        Ok(())
    }

    async fn pin_remove(&self, cid: Cid) -> Result<(), NodeError> {
        let mut swarm = self.swarm.lock().await;
        swarm.pinned.remove(&cid);
        swarm.unpin_log.push(cid);
        Ok(())
    }

    async fn garbage_collect(&self) -> Result<(), NodeError> {
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<PubsubSubscription, NodeError> {
        let (tx, rx) = mpsc::channel(64);
        self.swarm
            .lock()
            .await
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(PubsubSubscription { messages: rx })
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NodeError> {
        let swarm = self.swarm.lock().await;
        if let Some(senders) = swarm.topics.get(topic) {
            for sender in senders {
                let _ = sender
                    .send(GossipMessage {
                        sender: self.peer_id,
                        payload: payload.clone(),
                    })
                    .await;
            }
        }
        Ok(())
    }
}

/// Build a pool of `n` mock nodes sharing one [`MockSwarm`] (they all see
/// the same DHT/content/pubsub state, as if they were front-ends onto the
/// same swarm).
pub fn build_pool(n: usize) -> (NodePool, Arc<Mutex<MockSwarm>>) {
    let swarm = Arc::new(Mutex::new(MockSwarm::default()));
    let nodes: Vec<Arc<dyn Node>> = (0..n)
        .map(|_| Arc::new(MockNode::new(PeerId::random(), swarm.clone())) as Arc<dyn Node>)
        .collect();
    (NodePool::new(nodes), swarm)
}

fn leaf_cid(seed: &[u8]) -> Cid {
    let digest = obcrawler_core::hash::blake2b_256(seed);
    let hash = multihash::Multihash::wrap(0xb220, &digest).expect("valid multihash");
    Cid::new_v1(0x55, hash)
}

/// A fully wired peer publication: a root node with `profile.json` and
/// `listings.json` links, one listing ("shirt") with five item images, and
/// a profile with five avatar images — mirroring the "happy path" scenario.
pub struct PublishedPeer {
    pub keypair: Keypair,
    pub peer_id: PeerId,
    pub root_cid: Cid,
    pub avatar_cids: Vec<Cid>,
    pub item_image_cids: Vec<Cid>,
    pub listing_cid: Cid,
}

pub async fn publish_profile_and_listing(swarm: &Arc<Mutex<MockSwarm>>, tag: &str) -> PublishedPeer {
    let keypair = Keypair::generate_ed25519();
    let peer_id = keypair.public().to_peer_id();

    let avatar_cids: Vec<Cid> = (0..5)
        .map(|i| leaf_cid(format!("{tag}-avatar-{i}").as_bytes()))
        .collect();
    let item_image_cids: Vec<Cid> = (0..5)
        .map(|i| leaf_cid(format!("{tag}-item-image-{i}").as_bytes()))
        .collect();

    let profile_cid = leaf_cid(format!("{tag}-profile").as_bytes());
    let listing_cid = leaf_cid(format!("{tag}-listing").as_bytes());
    let listings_index_cid = leaf_cid(format!("{tag}-listings-index").as_bytes());
    let root_cid = leaf_cid(format!("{tag}-root").as_bytes());

    let mut swarm_guard = swarm.lock().await;

    swarm_guard.dag.insert(
        profile_cid,
        Ipld::Map(
            [(
                "avatars".to_string(),
                Ipld::List(avatar_cids.iter().map(|c| Ipld::Link(*c)).collect()),
            )]
            .into_iter()
            .collect(),
        ),
    );
    swarm_guard.dag.insert(
        listing_cid,
        Ipld::Map(
            [(
                "images".to_string(),
                Ipld::List(item_image_cids.iter().map(|c| Ipld::Link(*c)).collect()),
            )]
            .into_iter()
            .collect(),
        ),
    );
    swarm_guard.dag.insert(
        listings_index_cid,
        Ipld::List(vec![Ipld::Link(listing_cid)]),
    );
    swarm_guard.dag.insert(
        root_cid,
        Ipld::Map(
            [
                ("profile.json".to_string(), Ipld::Link(profile_cid)),
                ("listings.json".to_string(), Ipld::Link(listings_index_cid)),
            ]
            .into_iter()
            .collect(),
        ),
    );

    swarm_guard.files.insert(
        (root_cid, "profile.json".to_string()),
        serde_json::to_vec(&serde_json::json!({ "name": "Q" })).unwrap(),
    );
    swarm_guard.files.insert(
        (root_cid, "listings.json".to_string()),
        serde_json::to_vec(&serde_json::json!([{ "cid": listing_cid.to_string() }])).unwrap(),
    );
    swarm_guard.listings.insert(
        listing_cid,
        serde_json::to_vec(&serde_json::json!({
            "item": {
                "title": "shirt",
                "images": item_image_cids.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
            }
        }))
        .unwrap(),
    );

    drop(swarm_guard);

    PublishedPeer {
        keypair,
        peer_id,
        root_cid,
        avatar_cids,
        item_image_cids,
        listing_cid,
    }
}

/// Sign a mutable-name record pointing at `peer.root_cid` and store it in
/// the DHT under the peer's key, as if a prior crawl (or the peer itself)
/// had published it.
pub async fn seed_dht_record(
    swarm: &Arc<Mutex<MockSwarm>>,
    peer: &PublishedPeer,
    eol: Timestamp,
) -> Vec<u8> {
    let record = MutableNameRecord {
        peer_id: peer.peer_id,
        value: format!("/ipfs/{}", peer.root_cid),
        sequence: 1,
        eol,
        public_key: peer.keypair.public().encode_protobuf(),
    };
    let signed = SignedRecord::new(&peer.keypair, record).expect("sign");
    let bytes = signed.into_envelope().into_protobuf_encoding();
    swarm
        .lock()
        .await
        .dht
        .insert(MutableNameRecord::dht_key(&peer.peer_id), bytes.clone());
    bytes
}

/// Gossip-publish a signed record on `topic`, as the content peer itself
/// would: the pubsub message's sender is the peer's own identity, which is
/// what the gossip listener checks against the record's embedded peer id.
pub async fn gossip_publish(
    swarm: &Arc<Mutex<MockSwarm>>,
    topic: &str,
    peer: &PublishedPeer,
    eol: Timestamp,
) {
    let record = MutableNameRecord {
        peer_id: peer.peer_id,
        value: format!("/ipfs/{}", peer.root_cid),
        sequence: 1,
        eol,
        public_key: peer.keypair.public().encode_protobuf(),
    };
    let signed = SignedRecord::new(&peer.keypair, record).expect("sign");
    let bytes = signed.into_envelope().into_protobuf_encoding();

    let as_peer = MockNode::new(peer.peer_id, swarm.clone());
    let _ = as_peer.publish(topic, bytes).await;
}
