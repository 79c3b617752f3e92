use blake2b_simd::Params;

/// BLAKE2b hash, fixed at 32 bytes.
pub fn blake2b_256(ingest: &[u8]) -> [u8; 32] {
    let digest = Params::new()
        .hash_length(32)
        .to_state()
        .update(ingest)
        .finalize();

    let mut ret = [0u8; 32];
    ret.clone_from_slice(digest.as_bytes());
    ret
}

/// Dedupe fingerprint for a gossiped message: `hash(sender || payload)`.
///
/// Used by [`crate::gossip::GossipListener`] to recognize the same record
/// arriving through multiple pub/sub subscriptions.
pub fn dedupe_fingerprint(sender: &[u8], payload: &[u8]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(sender.len() + payload.len());
    buf.extend_from_slice(sender);
    buf.extend_from_slice(payload);
    blake2b_256(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_hashing() {
        let ing_vec = vec![1, 2, 3];

        assert_eq!(blake2b_256(&ing_vec), blake2b_256(&[1, 2, 3]));
        assert_ne!(blake2b_256(&ing_vec), blake2b_256(&[1, 2, 3, 4]));
    }

    #[test]
    fn fingerprint_distinguishes_sender() {
        let a = dedupe_fingerprint(b"peer-a", b"payload");
        let b = dedupe_fingerprint(b"peer-b", b"payload");
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_is_stable_for_same_inputs() {
        let a = dedupe_fingerprint(b"peer-a", b"payload");
        let b = dedupe_fingerprint(b"peer-a", b"payload");
        assert_eq!(a, b);
    }
}
