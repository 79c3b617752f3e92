//! Mutable-record gossip listener (spec 4.2).
//!
//! Subscribes on the fixed topic across the first `K` pool nodes, dedupes
//! messages by `hash(sender || payload)` within a 60-second window,
//! validates and persists survivors, and enqueues crawl jobs for
//! non-banned peers.

use crate::error::GossipError;
use crate::hash::dedupe_fingerprint;
use crate::ipns;
use crate::job::Job;
use crate::node::{GossipMessage, NodePool};
use crate::stats;
use crate::store::Store;
use crate::timestamp::Timestamp;
use lru_time_cache::LruCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

pub const TOPIC: &str = "/obcrawler/mutable-records/1.0.0";
const DEDUPE_WINDOW: Duration = Duration::from_secs(60);

pub struct GossipListener {
    store: Arc<dyn Store>,
    jobs: async_channel::Sender<Job>,
    seen: Arc<Mutex<LruCache<[u8; 32], ()>>>,
}

impl GossipListener {
    pub fn new(store: Arc<dyn Store>, jobs: async_channel::Sender<Job>) -> Self {
        Self {
            store,
            jobs,
            seen: Arc::new(Mutex::new(LruCache::with_expiry_duration(DEDUPE_WINDOW))),
        }
    }

    /// Subscribe on `pool`'s first `pubsub_nodes` nodes and spawn one
    /// reader task per subscription, all forwarding into a shared channel
    /// drained by a single dispatch task (spec section 5's actor list).
    pub async fn run(
        self: Arc<Self>,
        pool: NodePool,
        pubsub_nodes: usize,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<GossipMessage>(256);

        for node in pool.first(pubsub_nodes) {
            let node = node.clone();
            let tx = tx.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut sub = match node.subscribe(TOPIC).await {
                    Ok(sub) => sub,
                    Err(e) => {
                        warn!(error = %e, "gossip subscribe failed");
                        return;
                    }
                };
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        msg = sub.messages.recv() => {
                            match msg {
                                Some(msg) => {
                                    if tx.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            }
                        }
                    }
                }
            });
        }
        drop(tx);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_message(msg).await,
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_message(&self, msg: GossipMessage) {
        stats::GOSSIP_RECEIVED.inc();

        let fingerprint = dedupe_fingerprint(msg.sender.to_bytes().as_slice(), &msg.payload);
        {
            let mut seen = self.seen.lock().await;
            if seen.notify_insert(fingerprint, ()).0.is_some() {
                stats::GOSSIP_DEDUPED.inc();
                return;
            }
        }

        let now = Timestamp::now();
        let signed = match ipns::validate(&msg.payload, now) {
            Ok(signed) => signed,
            Err(e) => {
                let gossip_err = GossipError::from(e);
                match &gossip_err {
                    GossipError::Decode(_) => stats::GOSSIP_DECODE_FAILED.inc(),
                    GossipError::Validation(_) => stats::GOSSIP_VALIDATION_FAILED.inc(),
                }
                warn!(sender = %msg.sender, error = %gossip_err, "dropping invalid gossip record");
                return;
            }
        };

        if signed.record().peer_id != msg.sender {
            let gossip_err =
                GossipError::Validation("record peer id does not match gossip sender".to_string());
            warn!(sender = %msg.sender, error = %gossip_err, "dropping invalid gossip record");
            stats::GOSSIP_VALIDATION_FAILED.inc();
            return;
        }

        let eol = signed.record().eol;
        let bytes = signed.envelope().clone().into_protobuf_encoding();

        let banned = match self
            .store
            .record_gossip(msg.sender, &bytes, eol, now)
            .await
        {
            Ok(banned) => banned,
            Err(e) => {
                warn!(sender = %msg.sender, error = %e, "failed to persist gossip record");
                return;
            }
        };

        if banned {
            debug!(sender = %msg.sender, "record received for banned peer, not enqueuing");
            return;
        }

        let job = Job::from_gossip(msg.sender, signed);
        if self.jobs.send(job).await.is_err() {
            warn!("job queue closed, dropping gossip-triggered crawl");
        }
    }
}
