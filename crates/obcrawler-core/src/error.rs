//! Library-level error enums. Internal code returns these and propagates
//! with `?`; aggregating call sites (the binary, test harnesses) wrap them
//! with `anyhow::Context`.

use crate::ipns::IpnsError;
use crate::node::NodeError;
use crate::store::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum CrawlError {
    #[error("node operation failed: {0}")]
    Node(#[from] NodeError),
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),
    #[error("root payload is not a valid cid: {0}")]
    BadRootCid(String),
    #[error("peer is banned")]
    Banned,
}

#[derive(thiserror::Error, Debug)]
pub enum GossipError {
    #[error("failed to decode gossip payload: {0}")]
    Decode(String),
    #[error("record failed validation: {0}")]
    Validation(String),
}

impl From<IpnsError> for GossipError {
    fn from(e: IpnsError) -> Self {
        match e {
            IpnsError::BadPublicKey | IpnsError::Envelope(_) => GossipError::Decode(e.to_string()),
            IpnsError::Expired => GossipError::Validation(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_public_key_classifies_as_decode_failure() {
        assert!(matches!(GossipError::from(IpnsError::BadPublicKey), GossipError::Decode(_)));
    }

    #[test]
    fn expired_classifies_as_validation_failure() {
        assert!(matches!(GossipError::from(IpnsError::Expired), GossipError::Validation(_)));
    }
}
