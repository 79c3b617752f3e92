//! Peer observer (spec 4.1): keeps `first_seen`/`last_seen` current by
//! upserting a peer row on every connect/disconnect notification from every
//! pool node.

use crate::node::ConnectionEvent;
use crate::store::Store;
use crate::timestamp::Timestamp;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

pub struct PeerObserver {
    store: Arc<dyn Store>,
}

impl PeerObserver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Drain `events` (fed by the node runtime's connect/disconnect
    /// notifications across every pool node) until the channel closes.
    /// Database errors are logged and swallowed: observation is
    /// best-effort and convergent with the gossip listener.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
    }

    async fn handle(&self, event: ConnectionEvent) {
        let peer_id = match event {
            ConnectionEvent::Connected(p) | ConnectionEvent::Disconnected(p) => p,
        };
        if let Err(e) = self.store.touch_peer(peer_id, Timestamp::now()).await {
            warn!(%peer_id, error = %e, "failed to record peer observation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqlStore;
    use libp2p_identity::PeerId;

    async fn memory_store() -> Arc<dyn Store> {
        let store = SqlStore::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn connect_event_creates_row() {
        let store = memory_store().await;
        let observer = Arc::new(PeerObserver::new(store.clone()));
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(observer.run(rx));

        let peer = PeerId::random();
        tx.send(ConnectionEvent::Connected(peer)).await.unwrap();
        drop(tx);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(store.get_peer(peer).await.unwrap().is_some());
    }
}
