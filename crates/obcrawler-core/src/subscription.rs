//! Subscriber fan-out registry (spec 4.5).
//!
//! A shared map of `subscription_id -> out-channel`, guarded by a
//! reader-writer lock. `notify_all` holds the read lock across every send,
//! so a slow subscriber can stall the fan-out loop — documented rather than
//! hidden, per the spec's back-pressure design note. We pick "send blocks
//! the crawl": at-least-once to active subscribers, simplest to reason
//! about, and consistent with the rendezvous-channel design used everywhere
//! else in this engine.

use crate::job::CrawledObject;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

pub type SubscriptionId = u64;

/// A single subscriber's handle: consume from `receiver`, call `close()`
/// (or drop the registry's [`Subscriptions`] handle) when done.
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::Receiver<CrawledObject>,
}

#[derive(Clone)]
pub struct Subscriptions {
    inner: Arc<RwLock<HashMap<SubscriptionId, mpsc::Sender<CrawledObject>>>>,
    next_id: Arc<AtomicU64>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocate a new subscription with an unbuffered output channel.
    pub async fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(1);
        self.inner.write().await.insert(id, tx);
        Subscription { id, receiver: rx }
    }

    /// Remove a subscription and drop its sender, closing the receiver.
    pub async fn close(&self, id: SubscriptionId) {
        self.inner.write().await.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Send `object` to every currently registered subscriber, in
    /// registration order. Held under a read lock for the whole loop: a
    /// subscriber that never drains stalls every other send.
    pub async fn notify_all(&self, object: CrawledObject) {
        let subs = self.inner.read().await;
        for tx in subs.values() {
            let _ = tx.send(object.clone()).await;
        }
    }
}

impl Default for Subscriptions {
    fn default() -> Self {
        Self::new()
    }
}
