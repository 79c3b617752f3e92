//! In-memory work items and the documents a crawl can materialize.

use crate::ipns::MutableNameRecord;
use crate::signed_record::SignedRecord;
use crate::timestamp::Timestamp;
use cid::Cid;
use libp2p_identity::PeerId;
use serde::{Deserialize, Serialize};

/// One unit of crawl work, produced by the gossip listener, the manual
/// crawl entry point, or the stale-peer ticker, and consumed by exactly one
/// worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub peer_id: PeerId,
    /// Already-validated record, when the producer has one in hand (gossip
    /// listener, stale-peer ticker). `None` forces a fresh DHT lookup.
    pub signed_record: Option<SignedRecord<MutableNameRecord>>,
    pub expiration: Option<Timestamp>,
    /// Force Step A to go to the DHT even if `signed_record` is set.
    pub fetch_new_record: bool,
    /// Whether Step H should publish the record back to the DHT.
    pub pin_record: bool,
}

impl Job {
    pub fn from_gossip(peer_id: PeerId, record: SignedRecord<MutableNameRecord>) -> Self {
        let expiration = record.record().eol;
        Self {
            peer_id,
            signed_record: Some(record),
            expiration: Some(expiration),
            fetch_new_record: false,
            pin_record: false,
        }
    }

    pub fn manual(peer_id: PeerId, pin_record: bool) -> Self {
        Self {
            peer_id,
            signed_record: None,
            expiration: None,
            fetch_new_record: true,
            pin_record,
        }
    }

    pub fn stale_refresh(
        peer_id: PeerId,
        record: Option<SignedRecord<MutableNameRecord>>,
        pin_record: bool,
    ) -> Self {
        let expiration = record.as_ref().map(|r| r.record().eol);
        Self {
            peer_id,
            signed_record: record,
            expiration,
            fetch_new_record: true,
            pin_record,
        }
    }
}

/// A peer's profile document, `profile.json` under their root node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A single entry in `listings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingIndexEntry {
    pub cid: String,
}

/// A signed listing document, fetched by CID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub item: ListingItem,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingItem {
    pub title: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One object emitted to subscribers, tagged with the expiration timestamp
/// of the signing peer's current record (spec 4.4 Step H / section 6).
#[derive(Debug, Clone)]
pub enum CrawledObject {
    Profile {
        peer_id: PeerId,
        profile: Profile,
        expiration: Timestamp,
    },
    SignedListing {
        peer_id: PeerId,
        cid: Cid,
        listing: Listing,
        expiration: Timestamp,
    },
}
