//! Transactional relational persistence (spec section 6: `peers` and
//! `cid_records`). Backed by `sqlx`'s `Any` driver so the same code runs
//! against sqlite (default, and for tests) or postgres.
//!
//! Per spec section 5's shared-resource policy, every logical transaction
//! is serialized behind a single process-wide [`tokio::sync::Mutex`] —
//! simplicity over throughput, since realistic workloads see well under 10
//! QPS against this store.

use crate::models::{ContentMembership, Peer};
use crate::timestamp::Timestamp;
use async_trait::async_trait;
use cid::Cid;
use libp2p_identity::PeerId;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Any, Pool, Row};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("stored peer id is not valid: {0}")]
    BadPeerId(String),
    #[error("stored cid is not valid: {0}")]
    BadCid(String),
}

/// The persistence contract the rest of the engine is written against.
/// Method boundaries follow spec 4.1, 4.2 step 6, 4.4 Steps F/H, and 4.6's
/// stale-peer and unpin queries — each one the single transaction the spec
/// calls for.
#[async_trait]
pub trait Store: Send + Sync {
    async fn migrate(&self) -> Result<(), StoreError>;

    /// Upsert a peer row on connect/disconnect (spec 4.1) or on first
    /// gossip contact. Returns the row's current `banned` flag.
    async fn touch_peer(&self, peer_id: PeerId, now: Timestamp) -> Result<bool, StoreError>;

    /// Spec 4.2 step 6: persist a freshly validated gossip record and
    /// return whether the peer is banned.
    async fn record_gossip(
        &self,
        peer_id: PeerId,
        ipns_record: &[u8],
        ipns_expiration: Timestamp,
        now: Timestamp,
    ) -> Result<bool, StoreError>;

    async fn get_peer(&self, peer_id: PeerId) -> Result<Option<Peer>, StoreError>;

    async fn is_banned(&self, peer_id: PeerId) -> Result<bool, StoreError>;

    async fn set_banned(&self, peer_id: PeerId, banned: bool) -> Result<(), StoreError>;

    async fn content_membership_for_peer(
        &self,
        peer_id: PeerId,
    ) -> Result<Vec<Cid>, StoreError>;

    /// Any other peer referencing `cid`, for the "safe to unpin" check
    /// (invariant I3).
    async fn any_other_referrer(
        &self,
        cid: Cid,
        excluding_peer: PeerId,
    ) -> Result<bool, StoreError>;

    /// Spec 4.4 Step F: transactionally replace `peer_id`'s content
    /// membership rows with `new_cids`, returning the CIDs that lost their
    /// last referrer and are therefore safe to unpin.
    async fn diff_and_rewrite_membership(
        &self,
        peer_id: PeerId,
        new_cids: &HashSet<Cid>,
    ) -> Result<Vec<Cid>, StoreError>;

    /// Delete every content membership row for `peer_id` (ban path, I4),
    /// returning the CIDs that lost their last referrer.
    async fn clear_membership(&self, peer_id: PeerId) -> Result<Vec<Cid>, StoreError>;

    /// Spec 4.4 Step H: record crawl completion. `pin_record` is
    /// `Job.pin_record` itself — whether `last_pinned` advances depends only
    /// on whether the crawl was asked to pin the record, independent of
    /// whether the republish to the DHT actually succeeded.
    async fn finalize_crawl(
        &self,
        peer_id: PeerId,
        now: Timestamp,
        pin_record: bool,
    ) -> Result<(), StoreError>;

    /// Spec 4.6 stale-peer ticker query.
    async fn stale_peers(&self, now: Timestamp, limit: i64) -> Result<Vec<Peer>, StoreError>;

    /// Spec 4.6 unpin ticker query.
    async fn unpin_candidates(&self, now: Timestamp, limit: i64) -> Result<Vec<Peer>, StoreError>;
}

pub struct SqlStore {
    pool: Pool<Any>,
    txn_lock: Arc<Mutex<()>>,
}

impl SqlStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool,
            txn_lock: Arc::new(Mutex::new(())),
        })
    }

    fn row_to_peer(row: &AnyRow) -> Result<Peer, StoreError> {
        let peer_id: String = row.try_get("peer_id")?;
        let peer_id = PeerId::from_str(&peer_id).map_err(|_| StoreError::BadPeerId(peer_id))?;
        let ipns_record: Option<Vec<u8>> = row.try_get("ipns_record")?;
        Ok(Peer {
            peer_id,
            first_seen: Timestamp::from_secs(row.try_get::<i64, _>("first_seen")?),
            last_seen: Timestamp::from_secs(row.try_get::<i64, _>("last_seen")?),
            last_crawled: row
                .try_get::<Option<i64>, _>("last_crawled")?
                .map(Timestamp::from_secs),
            last_pinned: row
                .try_get::<Option<i64>, _>("last_pinned")?
                .map(Timestamp::from_secs),
            ipns_expiration: row
                .try_get::<Option<i64>, _>("ipns_expiration")?
                .map(Timestamp::from_secs),
            ipns_record,
            banned: row.try_get::<i64, _>("banned")? != 0,
        })
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS peers (
                peer_id TEXT PRIMARY KEY,
                first_seen BIGINT NOT NULL,
                last_seen BIGINT NOT NULL,
                last_crawled BIGINT,
                last_pinned BIGINT,
                ipns_expiration BIGINT,
                ipns_record BLOB,
                banned BIGINT NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cid_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cid TEXT NOT NULL,
                peer_id TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_peers_last_crawled ON peers(last_crawled)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_peers_banned ON peers(banned)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cid_records_cid ON cid_records(cid)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cid_records_peer ON cid_records(peer_id)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_peer(&self, peer_id: PeerId, now: Timestamp) -> Result<bool, StoreError> {
        let _guard = self.txn_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let pid = peer_id.to_string();

        sqlx::query(
            "INSERT INTO peers (peer_id, first_seen, last_seen, banned)
             VALUES ($1, $2, $2, 0)
             ON CONFLICT (peer_id) DO UPDATE SET last_seen = $2",
        )
        .bind(&pid)
        .bind(now.as_secs())
        .execute(&mut *tx)
        .await?;

        let banned: i64 = sqlx::query("SELECT banned FROM peers WHERE peer_id = $1")
            .bind(&pid)
            .fetch_one(&mut *tx)
            .await?
            .try_get(0)?;

        tx.commit().await?;
        Ok(banned != 0)
    }

    async fn record_gossip(
        &self,
        peer_id: PeerId,
        ipns_record: &[u8],
        ipns_expiration: Timestamp,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let _guard = self.txn_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let pid = peer_id.to_string();

        sqlx::query(
            "INSERT INTO peers (peer_id, first_seen, last_seen, ipns_record, ipns_expiration, banned)
             VALUES ($1, $2, $2, $3, $4, 0)
             ON CONFLICT (peer_id) DO UPDATE
             SET last_seen = $2, ipns_record = $3, ipns_expiration = $4",
        )
        .bind(&pid)
        .bind(now.as_secs())
        .bind(ipns_record)
        .bind(ipns_expiration.as_secs())
        .execute(&mut *tx)
        .await?;

        let banned: i64 = sqlx::query("SELECT banned FROM peers WHERE peer_id = $1")
            .bind(&pid)
            .fetch_one(&mut *tx)
            .await?
            .try_get(0)?;

        tx.commit().await?;
        Ok(banned != 0)
    }

    async fn get_peer(&self, peer_id: PeerId) -> Result<Option<Peer>, StoreError> {
        let row = sqlx::query("SELECT * FROM peers WHERE peer_id = $1")
            .bind(peer_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_peer).transpose()
    }

    async fn is_banned(&self, peer_id: PeerId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT banned FROM peers WHERE peer_id = $1")
            .bind(peer_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<i64, _>(0)? != 0),
            None => Ok(false),
        }
    }

    async fn set_banned(&self, peer_id: PeerId, banned: bool) -> Result<(), StoreError> {
        let _guard = self.txn_lock.lock().await;
        sqlx::query("UPDATE peers SET banned = $1 WHERE peer_id = $2")
            .bind(banned as i64)
            .bind(peer_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn content_membership_for_peer(&self, peer_id: PeerId) -> Result<Vec<Cid>, StoreError> {
        let rows = sqlx::query("SELECT cid FROM cid_records WHERE peer_id = $1")
            .bind(peer_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let cid: String = row.try_get(0)?;
                Cid::from_str(&cid).map_err(|_| StoreError::BadCid(cid))
            })
            .collect()
    }

    async fn any_other_referrer(
        &self,
        cid: Cid,
        excluding_peer: PeerId,
    ) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) FROM cid_records WHERE cid = $1 AND peer_id != $2",
        )
        .bind(cid.to_string())
        .bind(excluding_peer.to_string())
        .fetch_one(&self.pool)
        .await?
        .try_get(0)?;
        Ok(count > 0)
    }

    async fn diff_and_rewrite_membership(
        &self,
        peer_id: PeerId,
        new_cids: &HashSet<Cid>,
    ) -> Result<Vec<Cid>, StoreError> {
        let _guard = self.txn_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let pid = peer_id.to_string();

        let existing_rows = sqlx::query("SELECT cid FROM cid_records WHERE peer_id = $1")
            .bind(&pid)
            .fetch_all(&mut *tx)
            .await?;
        let mut old_cids = HashSet::new();
        for row in &existing_rows {
            let cid: String = row.try_get(0)?;
            old_cids.insert(Cid::from_str(&cid).map_err(|_| StoreError::BadCid(cid))?);
        }

        for cid in new_cids {
            if !old_cids.contains(cid) {
                sqlx::query("INSERT INTO cid_records (cid, peer_id) VALUES ($1, $2)")
                    .bind(cid.to_string())
                    .bind(&pid)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let mut to_unpin = Vec::new();
        for cid in old_cids.difference(new_cids) {
            sqlx::query("DELETE FROM cid_records WHERE cid = $1 AND peer_id = $2")
                .bind(cid.to_string())
                .bind(&pid)
                .execute(&mut *tx)
                .await?;

            let count: i64 = sqlx::query("SELECT COUNT(*) FROM cid_records WHERE cid = $1")
                .bind(cid.to_string())
                .fetch_one(&mut *tx)
                .await?
                .try_get(0)?;
            if count == 0 {
                to_unpin.push(*cid);
            }
        }

        tx.commit().await?;
        Ok(to_unpin)
    }

    async fn clear_membership(&self, peer_id: PeerId) -> Result<Vec<Cid>, StoreError> {
        let _guard = self.txn_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let pid = peer_id.to_string();

        let rows = sqlx::query("SELECT cid FROM cid_records WHERE peer_id = $1")
            .bind(&pid)
            .fetch_all(&mut *tx)
            .await?;
        let mut cids = Vec::new();
        for row in &rows {
            let cid: String = row.try_get(0)?;
            cids.push(Cid::from_str(&cid).map_err(|_| StoreError::BadCid(cid))?);
        }

        sqlx::query("DELETE FROM cid_records WHERE peer_id = $1")
            .bind(&pid)
            .execute(&mut *tx)
            .await?;

        let mut to_unpin = Vec::new();
        for cid in cids {
            let count: i64 = sqlx::query("SELECT COUNT(*) FROM cid_records WHERE cid = $1")
                .bind(cid.to_string())
                .fetch_one(&mut *tx)
                .await?
                .try_get(0)?;
            if count == 0 {
                to_unpin.push(cid);
            }
        }

        tx.commit().await?;
        Ok(to_unpin)
    }

    async fn finalize_crawl(
        &self,
        peer_id: PeerId,
        now: Timestamp,
        pin_record: bool,
    ) -> Result<(), StoreError> {
        let _guard = self.txn_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let pid = peer_id.to_string();

        sqlx::query(
            "INSERT INTO peers (peer_id, first_seen, last_seen, last_crawled, banned)
             VALUES ($1, $2, $2, $2, 0)
             ON CONFLICT (peer_id) DO UPDATE SET last_crawled = $2",
        )
        .bind(&pid)
        .bind(now.as_secs())
        .execute(&mut *tx)
        .await?;

        if pin_record {
            sqlx::query("UPDATE peers SET last_pinned = $1 WHERE peer_id = $2")
                .bind(now.as_secs())
                .bind(&pid)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn stale_peers(&self, now: Timestamp, limit: i64) -> Result<Vec<Peer>, StoreError> {
        let cutoff_crawled = (now - std::time::Duration::from_secs(7 * 86_400)).as_secs();
        let cutoff_seen = (now - std::time::Duration::from_secs(90 * 86_400)).as_secs();
        let rows = sqlx::query(
            "SELECT * FROM peers
             WHERE banned = 0
               AND ipns_expiration > $1
               AND (last_crawled IS NULL OR last_crawled < $2)
               AND last_seen > $3
             ORDER BY last_crawled ASC
             LIMIT $4",
        )
        .bind(now.as_secs())
        .bind(cutoff_crawled)
        .bind(cutoff_seen)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_peer).collect()
    }

    async fn unpin_candidates(&self, now: Timestamp, limit: i64) -> Result<Vec<Peer>, StoreError> {
        let cutoff_seen = (now - std::time::Duration::from_secs(90 * 86_400)).as_secs();
        let rows = sqlx::query(
            "SELECT * FROM peers
             WHERE ipns_expiration > $1
               AND last_seen > $2
             ORDER BY last_crawled ASC
             LIMIT $3",
        )
        .bind(now.as_secs())
        .bind(cutoff_seen)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_peer).collect()
    }
}

/// A row's membership rows collapsed to bare structs, handy for call sites
/// that just want `(cid, peer_id)` pairs rather than going through `Cid`
/// parsing twice.
impl From<&ContentMembership> for (String, String) {
    fn from(m: &ContentMembership) -> Self {
        (m.cid.to_string(), m.peer_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::str::FromStr as _;

    async fn memory_store() -> SqlStore {
        let store = SqlStore::connect("sqlite::memory:").await.expect("connect");
        store.migrate().await.expect("migrate");
        store
    }

    fn sample_cid(n: u8) -> Cid {
        let data = [n; 4];
        let digest = crate::hash::blake2b_256(&data);
        let hash = multihash::Multihash::wrap(0xb220, &digest).expect("valid multihash");
        Cid::new_v1(0x55, hash)
    }

    #[tokio::test]
    async fn touch_peer_creates_then_updates() {
        let store = memory_store().await;
        let peer = PeerId::random();
        let banned = store.touch_peer(peer, Timestamp::from_secs(10)).await.unwrap();
        assert!(!banned);
        let row = store.get_peer(peer).await.unwrap().unwrap();
        assert_eq!(row.first_seen, Timestamp::from_secs(10));

        store.touch_peer(peer, Timestamp::from_secs(20)).await.unwrap();
        let row = store.get_peer(peer).await.unwrap().unwrap();
        assert_eq!(row.first_seen, Timestamp::from_secs(10));
        assert_eq!(row.last_seen, Timestamp::from_secs(20));
    }

    #[tokio::test]
    async fn diff_rewrite_reports_unpin_candidates() {
        let store = memory_store().await;
        let peer = PeerId::random();
        store.touch_peer(peer, Timestamp::from_secs(1)).await.unwrap();

        let a = sample_cid(1);
        let b = sample_cid(2);
        let c = sample_cid(3);

        let first: HashSet<Cid> = [a, b].into_iter().collect();
        let unpin = store.diff_and_rewrite_membership(peer, &first).await.unwrap();
        assert!(unpin.is_empty());

        let second: HashSet<Cid> = [a, c].into_iter().collect();
        let unpin = store.diff_and_rewrite_membership(peer, &second).await.unwrap();
        assert_eq!(unpin, vec![b]);

        let remaining = store.content_membership_for_peer(peer).await.unwrap();
        let remaining: HashSet<_> = remaining.into_iter().collect();
        assert_eq!(remaining, second);
    }

    #[tokio::test]
    async fn shared_cid_is_not_a_candidate_until_last_referrer_drops() {
        let store = memory_store().await;
        let p1 = PeerId::random();
        let p2 = PeerId::random();
        let shared = sample_cid(9);

        store
            .diff_and_rewrite_membership(p1, &[shared].into_iter().collect())
            .await
            .unwrap();
        store
            .diff_and_rewrite_membership(p2, &[shared].into_iter().collect())
            .await
            .unwrap();

        let unpin = store
            .diff_and_rewrite_membership(p1, &HashSet::new())
            .await
            .unwrap();
        assert!(unpin.is_empty(), "p2 still references it");

        let unpin = store
            .diff_and_rewrite_membership(p2, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(unpin, vec![shared]);
    }

    #[tokio::test]
    async fn ban_clears_membership() {
        let store = memory_store().await;
        let peer = PeerId::random();
        let cid = sample_cid(7);
        store
            .diff_and_rewrite_membership(peer, &[cid].into_iter().collect())
            .await
            .unwrap();

        store.set_banned(peer, true).await.unwrap();
        assert!(store.is_banned(peer).await.unwrap());

        let unpin = store.clear_membership(peer).await.unwrap();
        assert_eq!(unpin, vec![cid]);
        assert!(store.content_membership_for_peer(peer).await.unwrap().is_empty());
    }
}
