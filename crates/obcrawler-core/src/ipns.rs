//! The signed mutable-name record a peer publishes so others can resolve its
//! current root content id, and the DHT key that record is stored under.

use crate::signed_record::{Record, SignedRecord};
use crate::timestamp::Timestamp;
use libp2p_identity::{PeerId, PublicKey};
use serde::{Deserialize, Serialize};

/// A peer's mutable pointer to its current root IPLD node, analogous to an
/// IPNS entry: a value (the path/CID the name currently resolves to), a
/// strictly increasing sequence number, and an expiration after which the
/// record must no longer be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutableNameRecord {
    /// Peer that authored and must have signed this record.
    pub peer_id: PeerId,
    /// Path the name currently resolves to, e.g. `/ipfs/<cid>`.
    pub value: String,
    /// Strictly increasing per-peer counter; used to discard stale records.
    pub sequence: u64,
    /// Unix time after which this record is no longer valid.
    pub eol: Timestamp,
    /// Protobuf-encoded public key, carried so peers that only know the
    /// multihash-derived [`PeerId`] can still verify the envelope.
    pub public_key: Vec<u8>,
}

impl MutableNameRecord {
    /// The DHT key this record is stored and looked up under.
    ///
    /// Mirrors `ipns.RecordKey(pid)`: the ASCII string `/ipns/<peer id>`.
    pub fn dht_key(peer_id: &PeerId) -> Vec<u8> {
        format!("/ipns/{peer_id}").into_bytes()
    }

    /// Recover the [`PublicKey`] a record claims to be signed by.
    pub fn extract_public_key(&self) -> Result<PublicKey, IpnsError> {
        PublicKey::try_decode_protobuf(&self.public_key).map_err(|_| IpnsError::BadPublicKey)
    }

    /// Whether this record is still valid at `now`.
    pub fn is_live(&self, now: Timestamp) -> bool {
        self.eol > now
    }
}

impl Record for MutableNameRecord {
    fn payload_type() -> &'static str {
        "/obcrawler/mutable-name-record"
    }

    fn check_signing_key(&self, key: &PublicKey) -> bool {
        self.peer_id == key.to_peer_id()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum IpnsError {
    #[error("record carries a public key that does not decode")]
    BadPublicKey,
    #[error("record has expired")]
    Expired,
    #[error(transparent)]
    Envelope(#[from] crate::signed_record::FromEnvelopeError),
}

/// Validate a freshly-fetched or gossiped record: the envelope signature
/// must check out and the record must not be past its `eol`.
pub fn validate(
    bytes: &[u8],
    now: Timestamp,
) -> Result<SignedRecord<MutableNameRecord>, IpnsError> {
    let signed = SignedRecord::<MutableNameRecord>::from_bytes(bytes)
        .map_err(|e| match e.downcast::<crate::signed_record::FromEnvelopeError>() {
            Ok(inner) => IpnsError::Envelope(inner),
            Err(_) => IpnsError::BadPublicKey,
        })?;
    if !signed.record().is_live(now) {
        return Err(IpnsError::Expired);
    }
    Ok(signed)
}
