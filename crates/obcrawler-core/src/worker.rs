//! The per-peer crawl algorithm (spec 4.4) and the worker pool that drains
//! the job queue.

use crate::config::EngineConfig;
use crate::error::CrawlError;
use crate::ipns::{self, MutableNameRecord};
use crate::job::{CrawledObject, Job, Listing, ListingIndexEntry, Profile};
use crate::node::{Node, NodePool};
use crate::signed_record::SignedRecord;
use crate::stats;
use crate::store::Store;
use crate::subscription::Subscriptions;
use crate::timestamp::Timestamp;
use cid::Cid;
use libipld::Ipld;
use libp2p_identity::PeerId;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WorkerPool {
    store: Arc<dyn Store>,
    pool: NodePool,
    subscriptions: Subscriptions,
    config: EngineConfig,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn Store>,
        pool: NodePool,
        subscriptions: Subscriptions,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            pool,
            subscriptions,
            config,
        }
    }

    /// Spawn `num_workers` tasks, each looping on `jobs` until the channel
    /// closes or `shutdown` fires. Workers select on both per spec 4.3.
    pub fn spawn(
        self: Arc<Self>,
        jobs: async_channel::Receiver<Job>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.num_workers)
            .map(|_| {
                let worker = self.clone();
                let jobs = jobs.clone();
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            job = jobs.recv() => {
                                match job {
                                    Ok(job) => worker.process(job).await,
                                    Err(_) => break,
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }

    pub async fn process(&self, job: Job) {
        stats::JOB_QUEUE_DEPTH.inc();
        let start = Instant::now();
        let peer_id = job.peer_id;
        debug!(%peer_id, "crawl started");

        let node = self.pool.pick_one();
        let mut ctx = CrawlContext {
            signed_record: job.signed_record.clone(),
            emissions: Vec::new(),
        };

        let outcome = self.run_steps(&job, &mut ctx, node.as_ref()).await;
        if let Err(e) = &outcome {
            warn!(%peer_id, error = %e, "crawl step failed, finalizing");
            stats::CRAWL_FAILED.inc();
        } else {
            stats::CRAWL_SUCCESS.inc();
        }

        self.finalize(&job, &ctx, node.as_ref()).await;

        info!(%peer_id, elapsed_ms = %start.elapsed().as_millis(), "crawl finished");
        stats::JOB_QUEUE_DEPTH.dec();
    }

    /// Steps A through G. Any early return here still lets [`Self::finalize`]
    /// (Step H) run, matching the "deferred finalization on every exit path"
    /// contract.
    async fn run_steps(
        &self,
        job: &Job,
        ctx: &mut CrawlContext,
        node: &dyn Node,
    ) -> Result<(), CrawlError> {
        // Step A.
        if job.fetch_new_record || ctx.signed_record.is_none() {
            let key = MutableNameRecord::dht_key(&job.peer_id);
            let bytes = match node
                .routing_get_value(&key, self.config.ipns_quorum)
                .await
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(peer_id = %job.peer_id, error = %e, "ipns record lookup failed");
                    return Ok(());
                }
            };

            let now = Timestamp::now();
            let fresh = match ipns::validate(&bytes, now) {
                Ok(signed) => signed,
                Err(e) => {
                    warn!(peer_id = %job.peer_id, error = %e, "fetched ipns record failed validation");
                    return Ok(());
                }
            };

            if let Some(old) = &ctx.signed_record {
                if old.record().value == fresh.record().value {
                    debug!(peer_id = %job.peer_id, "ipns record unchanged");
                    stats::CRAWL_UNCHANGED.inc();
                    return Ok(());
                }
            }
            ctx.signed_record = Some(fresh);
        }

        let signed = match &ctx.signed_record {
            Some(s) => s.clone(),
            None => return Ok(()),
        };

        // Step B.
        let root_cid = Cid::from_str(signed.record().value.trim_start_matches("/ipfs/"))
            .map_err(|e| CrawlError::BadRootCid(e.to_string()))?;
        let root = match node.dag_get(root_cid, FETCH_TIMEOUT).await {
            Ok(root) => root,
            Err(e) => {
                warn!(peer_id = %job.peer_id, error = %e, "failed to fetch root node");
                return Ok(());
            }
        };

        // Step C.
        let profile_cid = resolve_link(&root, "profile.json");
        let listings_cid = resolve_link(&root, "listings.json");

        // Step D.
        let mut new_cids: HashSet<Cid> = HashSet::new();
        new_cids.insert(root_cid);

        if let Some(cid) = profile_cid {
            new_cids.insert(cid);
            match node.file_get(root_cid, "profile.json", FETCH_TIMEOUT).await {
                Ok(bytes) => match serde_json::from_slice::<Profile>(&bytes) {
                    Ok(profile) => ctx.emissions.push(CrawledObject::Profile {
                        peer_id: job.peer_id,
                        profile,
                        expiration: signed.record().eol,
                    }),
                    Err(e) => warn!(peer_id = %job.peer_id, error = %e, "malformed profile document"),
                },
                Err(e) => debug!(peer_id = %job.peer_id, error = %e, "profile fetch failed"),
            }
        }

        if let Some(cid) = listings_cid {
            new_cids.insert(cid);
            match node.file_get(root_cid, "listings.json", FETCH_TIMEOUT).await {
                Ok(bytes) => match serde_json::from_slice::<Vec<ListingIndexEntry>>(&bytes) {
                    Ok(entries) => {
                        for entry in entries {
                            let Ok(listing_cid) = Cid::from_str(&entry.cid) else {
                                warn!(peer_id = %job.peer_id, cid = %entry.cid, "malformed listing cid");
                                continue;
                            };
                            match node.get_listing(listing_cid, FETCH_TIMEOUT).await {
                                Ok(bytes) => match serde_json::from_slice::<Listing>(&bytes) {
                                    Ok(listing) => {
                                        new_cids.insert(listing_cid);
                                        ctx.emissions.push(CrawledObject::SignedListing {
                                            peer_id: job.peer_id,
                                            cid: listing_cid,
                                            listing,
                                            expiration: signed.record().eol,
                                        });
                                    }
                                    Err(e) => warn!(peer_id = %job.peer_id, error = %e, "malformed listing document"),
                                },
                                Err(e) => debug!(peer_id = %job.peer_id, cid = %listing_cid, error = %e, "listing fetch failed"),
                            }
                        }
                    }
                    Err(e) => warn!(peer_id = %job.peer_id, error = %e, "malformed listings index"),
                },
                Err(e) => debug!(peer_id = %job.peer_id, error = %e, "listings index fetch failed"),
            }
        }

        // Step E.
        if self.config.cache_data {
            self.collect_full_dag(root_cid, &root, node, &mut new_cids)
                .await;
        }

        // Step F.
        let to_unpin = self
            .store
            .diff_and_rewrite_membership(job.peer_id, &new_cids)
            .await?;

        // Step G.
        if self.config.pin_files {
            stats::PIN_ADD_TOTAL.inc();
            if let Err(e) = node.pin_add(root_cid, true, FETCH_TIMEOUT).await {
                warn!(peer_id = %job.peer_id, error = %e, "pin-add failed");
            }
        }
        for cid in to_unpin {
            for n in self.pool.all() {
                stats::PIN_REMOVE_TOTAL.inc();
                if let Err(e) = n.pin_remove(cid).await {
                    stats::PIN_REMOVE_FAILURE.inc();
                    warn!(%cid, error = %e, "pin-remove failed");
                }
            }
        }

        Ok(())
    }

    /// Breadth-first traversal of every IPLD link reachable from `root`,
    /// used only when the engine is configured to cache full peer DAGs.
    async fn collect_full_dag(
        &self,
        root_cid: Cid,
        root: &Ipld,
        node: &dyn Node,
        acc: &mut HashSet<Cid>,
    ) {
        let mut frontier: Vec<Cid> = links_of(root);
        let mut visited: HashSet<Cid> = HashSet::from([root_cid]);

        while let Some(cid) = frontier.pop() {
            if !visited.insert(cid) {
                continue;
            }
            acc.insert(cid);
            match node.dag_get(cid, FETCH_TIMEOUT).await {
                Ok(child) => frontier.extend(links_of(&child)),
                Err(e) => debug!(%cid, error = %e, "dag traversal fetch failed"),
            }
        }
    }

    /// Step H: runs on every exit path out of [`Self::run_steps`]. Per spec
    /// section 3, `last_pinned` tracks whether the crawl *was asked* to pin
    /// the record (`job.pin_record`), not whether the republish actually
    /// succeeded — a transient DHT put failure is logged but does not hold
    /// `last_pinned` back, since that field exists for the
    /// last_crawled/last_pinned lag observability contract in spec 4.7.
    async fn finalize(&self, job: &Job, ctx: &CrawlContext, node: &dyn Node) {
        let now = Timestamp::now();

        if job.pin_record {
            if let Some(signed) = &ctx.signed_record {
                let key = MutableNameRecord::dht_key(&job.peer_id);
                let bytes = signed.envelope().clone().into_protobuf_encoding();
                if let Err(e) = node.routing_put_value(&key, bytes).await {
                    warn!(peer_id = %job.peer_id, error = %e, "failed to republish record");
                }
            }
        }

        if let Err(e) = self
            .store
            .finalize_crawl(job.peer_id, now, job.pin_record)
            .await
        {
            warn!(peer_id = %job.peer_id, error = %e, "failed to record crawl completion");
        }

        for emission in ctx.emissions.iter() {
            self.subscriptions.notify_all(emission.clone()).await;
        }
    }
}

struct CrawlContext {
    signed_record: Option<SignedRecord<MutableNameRecord>>,
    emissions: Vec<CrawledObject>,
}

/// Resolve a logical child name ("profile.json", "listings.json") under a
/// root node represented as an IPLD map of name to link. A missing link is
/// tolerated (returns `None`); the caller treats any other shape as simply
/// having no such link.
fn resolve_link(root: &Ipld, name: &str) -> Option<Cid> {
    match root {
        Ipld::Map(map) => match map.get(name)? {
            Ipld::Link(cid) => Some(*cid),
            _ => None,
        },
        _ => None,
    }
}

fn links_of(node: &Ipld) -> Vec<Cid> {
    let mut out = Vec::new();
    walk_links(node, &mut out);
    out
}

fn walk_links(node: &Ipld, out: &mut Vec<Cid>) {
    match node {
        Ipld::Link(cid) => out.push(*cid),
        Ipld::Map(map) => {
            for v in map.values() {
                walk_links(v, out);
            }
        }
        Ipld::List(list) => {
            for v in list {
                walk_links(v, out);
            }
        }
        _ => {}
    }
}

/// Enqueue a manual crawl (spec 4.3's `CrawlNode`). Checks `banned` in its
/// own transaction before enqueuing, per spec 4.7.
pub async fn enqueue_manual_crawl(
    store: &dyn Store,
    jobs: &async_channel::Sender<Job>,
    peer_id: PeerId,
    pin_record: bool,
) -> Result<(), CrawlError> {
    if store.is_banned(peer_id).await? {
        return Err(CrawlError::Banned);
    }
    let job = Job::manual(peer_id, pin_record);
    let _ = jobs.send(job).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_link_ignores_non_link_values() {
        let mut map = std::collections::BTreeMap::new();
        map.insert("profile.json".to_string(), Ipld::String("oops".into()));
        let root = Ipld::Map(map);
        assert_eq!(resolve_link(&root, "profile.json"), None);
    }

    #[test]
    fn walk_links_finds_nested_links() {
        let digest = crate::hash::blake2b_256(b"nested");
        let hash = multihash::Multihash::wrap(0xb220, &digest).expect("valid multihash");
        let cid = Cid::new_v1(0x55, hash);
        let mut inner = std::collections::BTreeMap::new();
        inner.insert("a".to_string(), Ipld::Link(cid));
        let root = Ipld::List(vec![Ipld::Map(inner)]);
        assert_eq!(links_of(&root), vec![cid]);
    }
}
