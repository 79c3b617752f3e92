use libp2p_core::signed_envelope;
use libp2p_core::SignedEnvelope;
use libp2p_identity::{Keypair, PublicKey};
use serde::de::DeserializeOwned;
use serde::Serialize;

const DOMAIN_SEP: &str = "/obcrawler/signed-record";

/// A payload that can be carried inside a [`SignedEnvelope`].
///
/// Implemented by the mutable-name record type in [`crate::ipns`]; kept
/// generic so any future signed gossip payload can reuse the same envelope
/// plumbing instead of hand-rolling signature checks.
pub trait Record {
    /// Payload type tag embedded in the envelope and checked on decode.
    fn payload_type() -> &'static str;
    /// Confirm the key that produced the envelope's signature is the one the
    /// record claims authority for (e.g. the record's peer id).
    fn check_signing_key(&self, key: &PublicKey) -> bool;
}

/// A [`Record`] together with the [`SignedEnvelope`] that proves who signed
/// it and lets it be relayed to other peers byte-for-byte.
#[derive(Debug, Clone)]
pub struct SignedRecord<R> {
    /// The deserialized and validated record.
    record: R,
    /// The envelope the record was extracted from.
    envelope: SignedEnvelope,
}

// Based on `libp2p_core::peer_record::PeerRecord`.
impl<R> SignedRecord<R>
where
    R: Record + Serialize + DeserializeOwned,
{
    /// Sign `record` with `key`, producing a [`SignedRecord`] that can be
    /// shared with other peers over gossip.
    pub fn new(key: &Keypair, record: R) -> anyhow::Result<Self> {
        let payload = serde_json::to_vec(&record)?;
        let envelope = SignedEnvelope::new(
            key,
            DOMAIN_SEP.to_owned(),
            R::payload_type().as_bytes().to_vec(),
            payload,
        )?;
        Ok(Self { record, envelope })
    }

    pub fn from_signed_envelope(envelope: SignedEnvelope) -> Result<Self, FromEnvelopeError> {
        let (payload, signing_key) = envelope
            .payload_and_signing_key(DOMAIN_SEP.to_owned(), R::payload_type().as_bytes())?;

        let record = serde_json::from_slice::<R>(payload)?;

        if !record.check_signing_key(signing_key) {
            return Err(FromEnvelopeError::MismatchedSignature);
        }

        Ok(Self { record, envelope })
    }

    /// Decode a protobuf-encoded envelope, then check domain tag and signature.
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let envelope = SignedEnvelope::from_protobuf_encoding(bytes)?;
        let signed_record = Self::from_signed_envelope(envelope)?;
        Ok(signed_record)
    }

    pub fn record(&self) -> &R {
        &self.record
    }

    pub fn envelope(&self) -> &SignedEnvelope {
        &self.envelope
    }

    pub fn into_record(self) -> R {
        self.record
    }

    pub fn into_envelope(self) -> SignedEnvelope {
        self.envelope
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FromEnvelopeError {
    #[error("failed to extract payload from envelope")]
    BadPayload(#[from] signed_envelope::ReadPayloadError),
    #[error("failed to decode bytes as record")]
    InvalidRecord(#[from] serde_json::Error),
    #[error("the signer of the envelope does not match the peer id in the record")]
    MismatchedSignature,
}

#[cfg(test)]
pub mod tests {
    use super::{Record, SignedRecord};
    use libp2p_core::SignedEnvelope;
    use serde::de::DeserializeOwned;
    use serde::Serialize;

    pub fn prop_roundtrip<R>(signed_record: SignedRecord<R>) -> bool
    where
        R: Serialize + DeserializeOwned + Record + PartialEq,
    {
        let envelope_bytes = signed_record.envelope().clone().into_protobuf_encoding();

        let envelope =
            SignedEnvelope::from_protobuf_encoding(&envelope_bytes).expect("envelope roundtrip");

        let signed_record2 =
            SignedRecord::<R>::from_signed_envelope(envelope).expect("record roundtrip");

        signed_record2.into_record() == *signed_record.record()
    }

    #[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq)]
    struct Greeting {
        peer: libp2p_identity::PeerId,
        text: String,
    }

    impl Record for Greeting {
        fn payload_type() -> &'static str {
            "/obcrawler/test/greeting"
        }

        fn check_signing_key(&self, key: &libp2p_identity::PublicKey) -> bool {
            self.peer == key.to_peer_id()
        }
    }

    #[test]
    fn signs_and_roundtrips() {
        let key = libp2p_identity::Keypair::generate_ed25519();
        let record = Greeting {
            peer: key.public().to_peer_id(),
            text: "hello".to_owned(),
        };
        let signed = SignedRecord::new(&key, record).expect("sign");
        assert!(prop_roundtrip(signed));
    }

    #[test]
    fn rejects_mismatched_signer() {
        let key = libp2p_identity::Keypair::generate_ed25519();
        let other = libp2p_identity::Keypair::generate_ed25519();
        let record = Greeting {
            peer: other.public().to_peer_id(),
            text: "hello".to_owned(),
        };
        let signed = SignedRecord::new(&key, record).expect("sign");
        let bytes = signed.into_envelope().into_protobuf_encoding();
        let err = SignedRecord::<Greeting>::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("signer"));
    }
}
