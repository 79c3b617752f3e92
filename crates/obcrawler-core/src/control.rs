//! The four independent control-loop tickers (spec 4.6).

use crate::ipns::MutableNameRecord;
use crate::job::Job;
use crate::node::NodePool;
use crate::signed_record::SignedRecord;
use crate::store::Store;
use crate::timestamp::Timestamp;
use libp2p_identity::Keypair;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

const STALE_PEER_BATCH: i64 = 10;
const UNPIN_BATCH: i64 = 10;
const STALE_PEER_PERIOD: Duration = Duration::from_secs(60);
const UNPIN_PERIOD: Duration = Duration::from_secs(3600);
const GC_PERIOD: Duration = Duration::from_secs(24 * 3600);

/// Random DHT walk ticker: forces every pool node to refresh its routing
/// table by looking up a throwaway random peer id. A clean "not found" is
/// the expected, successful outcome; anything else is logged.
pub async fn crawl_ticker(
    pool: NodePool,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let node = pool.pick_one();
                let random_peer = Keypair::generate_ed25519().public().to_peer_id();
                match node.routing_find_peer(random_peer).await {
                    Ok(None) => {}
                    Ok(Some(_)) => warn!(%random_peer, "random-walk lookup unexpectedly found a peer"),
                    Err(e) => warn!(%random_peer, error = %e, "random-walk lookup failed"),
                }
            }
        }
    }
}

/// Repo garbage collection ticker: invoke `GarbageCollect` asynchronously
/// on every pool node once a day.
pub async fn gc_ticker(pool: NodePool, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(GC_PERIOD);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                for node in pool.all() {
                    let node = node.clone();
                    tokio::spawn(async move {
                        if let Err(e) = node.garbage_collect().await {
                            warn!(error = %e, "garbage collection failed");
                        }
                    });
                }
            }
        }
    }
}

/// Stale-peer re-crawl ticker: re-enqueue peers whose records are still
/// live but haven't been crawled in a week.
pub async fn stale_peer_ticker(
    store: Arc<dyn Store>,
    jobs: async_channel::Sender<Job>,
    pin_records: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(STALE_PEER_PERIOD);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let now = Timestamp::now();
                let peers = match store.stale_peers(now, STALE_PEER_BATCH).await {
                    Ok(peers) => peers,
                    Err(e) => {
                        warn!(error = %e, "stale-peer query failed");
                        continue;
                    }
                };
                for peer in peers {
                    let record = peer
                        .ipns_record
                        .as_deref()
                        .and_then(|bytes| SignedRecord::<MutableNameRecord>::from_bytes(bytes).ok());
                    let job = Job::stale_refresh(peer.peer_id, record, pin_records);
                    let _ = jobs.send(job).await;
                }
            }
        }
    }
}

/// Dead-peer unpin ticker: best-effort unpin for peers who have not
/// disappeared from `last_seen` but whose content should be released
/// because the crawl engine has not revisited them.
pub async fn unpin_ticker(
    store: Arc<dyn Store>,
    pool: NodePool,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(UNPIN_PERIOD);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let now = Timestamp::now();
                let peers = match store.unpin_candidates(now, UNPIN_BATCH).await {
                    Ok(peers) => peers,
                    Err(e) => {
                        warn!(error = %e, "unpin-candidate query failed");
                        continue;
                    }
                };
                for peer in peers {
                    let cids = match store.content_membership_for_peer(peer.peer_id).await {
                        Ok(cids) => cids,
                        Err(e) => {
                            warn!(peer_id = %peer.peer_id, error = %e, "failed to load membership for unpin scan");
                            continue;
                        }
                    };
                    for cid in cids {
                        for node in pool.all() {
                            if let Err(e) = node.pin_remove(cid).await {
                                warn!(%cid, error = %e, "unpin-scan pin-remove failed");
                            }
                        }
                    }
                }
            }
        }
    }
}
