//! Persisted row shapes. See spec section 3 ("Data Model") and section 6
//! ("Persisted state") for the schema these mirror.

use crate::timestamp::Timestamp;
use cid::Cid;
use libp2p_identity::PeerId;
use serde::{Deserialize, Serialize};

/// A peer's identity and observational metadata. Primary key `peer_id`.
///
/// Invariant (I1): `ipns_expiration` is always consistent with `ipns_record`
/// — the two fields are only ever written together, from the same validated
/// [`crate::ipns::MutableNameRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub peer_id: PeerId,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub last_crawled: Option<Timestamp>,
    pub last_pinned: Option<Timestamp>,
    pub ipns_expiration: Option<Timestamp>,
    /// Opaque bytes of the most recent valid signed mutable record
    /// (protobuf-encoded [`libp2p_core::SignedEnvelope`]).
    pub ipns_record: Option<Vec<u8>>,
    pub banned: bool,
}

/// "Content item `cid` is referenced by peer `peer_id`." A CID is safe to
/// unpin only once no row references it (invariant I3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMembership {
    pub cid: Cid,
    pub peer_id: PeerId,
}
