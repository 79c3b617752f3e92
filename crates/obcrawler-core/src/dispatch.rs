//! The top-level engine façade: wires the job queue, worker pool, gossip
//! listener, peer observer, and control loops together, and exposes the
//! manual crawl / ban / unban entry points (spec 4.3, 4.7).

use crate::config::EngineConfig;
use crate::control;
use crate::error::CrawlError;
use crate::gossip::GossipListener;
use crate::job::Job;
use crate::node::{ConnectionEvent, NodePool};
use crate::observer::PeerObserver;
use crate::store::{Store, StoreError};
use crate::subscription::{Subscription, Subscriptions};
use crate::worker::{self, WorkerPool};
use libp2p_identity::PeerId;
use std::sync::Arc;
use tokio::sync::watch;

/// A running crawl engine. Construct with [`Crawler::start`]; call
/// [`Crawler::shutdown`] to stop every loop and worker cleanly.
pub struct Crawler {
    store: Arc<dyn Store>,
    pool: NodePool,
    jobs: async_channel::Sender<Job>,
    subscriptions: Subscriptions,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl Crawler {
    pub async fn start(
        store: Arc<dyn Store>,
        pool: NodePool,
        config: EngineConfig,
        connection_events: tokio::sync::mpsc::Receiver<ConnectionEvent>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        store.migrate().await?;

        let (jobs_tx, jobs_rx) = async_channel::bounded::<Job>(0);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let subscriptions = Subscriptions::new();

        let observer = Arc::new(PeerObserver::new(store.clone()));
        tokio::spawn(observer.run(connection_events));

        let gossip = Arc::new(GossipListener::new(store.clone(), jobs_tx.clone()));
        tokio::spawn(gossip.run(pool.clone(), config.pubsub_nodes, shutdown_rx.clone()));

        let worker_pool = Arc::new(WorkerPool::new(
            store.clone(),
            pool.clone(),
            subscriptions.clone(),
            config.clone(),
        ));
        let workers = worker_pool.spawn(jobs_rx.clone(), shutdown_rx.clone());

        tokio::spawn(control::crawl_ticker(
            pool.clone(),
            config.crawl_interval,
            shutdown_rx.clone(),
        ));
        tokio::spawn(control::gc_ticker(pool.clone(), shutdown_rx.clone()));
        tokio::spawn(control::stale_peer_ticker(
            store.clone(),
            jobs_tx.clone(),
            config.pin_records,
            shutdown_rx.clone(),
        ));
        tokio::spawn(control::unpin_ticker(
            store.clone(),
            pool.clone(),
            shutdown_rx.clone(),
        ));

        Ok(Self {
            store,
            pool,
            jobs: jobs_tx,
            subscriptions,
            shutdown_tx,
            workers,
        })
    }

    /// Manual `CrawlNode(peer_id)` entry point.
    pub async fn crawl_node(&self, peer_id: PeerId, pin_record: bool) -> Result<(), CrawlError> {
        worker::enqueue_manual_crawl(self.store.as_ref(), &self.jobs, peer_id, pin_record).await
    }

    /// Spec 4.7 `BanNode`.
    pub async fn ban_node(&self, peer_id: PeerId) -> Result<(), StoreError> {
        self.store.set_banned(peer_id, true).await?;
        let cids = self.store.clear_membership(peer_id).await?;
        for node in self.pool.all() {
            for cid in &cids {
                if let Err(e) = node.pin_remove(*cid).await {
                    tracing::warn!(%peer_id, %cid, error = %e, "ban: pin-remove failed");
                }
            }
        }
        Ok(())
    }

    /// Spec 4.7 `UnbanNode`. Does not re-enqueue a crawl.
    pub async fn unban_node(&self, peer_id: PeerId) -> Result<(), StoreError> {
        self.store.set_banned(peer_id, false).await
    }

    pub async fn subscribe(&self) -> Subscription {
        self.subscriptions.subscribe().await
    }

    pub async fn unsubscribe(&self, id: crate::subscription::SubscriptionId) {
        self.subscriptions.close(id).await;
    }

    /// Stop every control loop, the gossip listener, and all workers.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.jobs.close();
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
