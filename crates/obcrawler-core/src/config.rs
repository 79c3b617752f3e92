//! Engine-level configuration surface (spec section 6's "Config surface").

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub num_nodes: usize,
    pub num_workers: usize,
    pub pubsub_nodes: usize,
    pub ipns_quorum: usize,
    pub crawl_interval: Duration,
    /// `!disable_data_caching`: traverse and pin the full DAG below the
    /// root, not just the root/profile/listings/listing CIDs.
    pub cache_data: bool,
    /// `!disable_file_pinning`: issue the recursive pin-add in Step G.
    pub pin_files: bool,
    /// `!disable_ipns_pinning`: whether manual crawls default to
    /// `pin_record = true`.
    pub pin_records: bool,
    pub bootstrap_addrs: Vec<String>,
    pub testnet: bool,
    pub uacomment: String,
}

impl EngineConfig {
    /// Enforce the invariants from spec section 6: non-zero counts,
    /// `pubsub_nodes <= num_nodes`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_nodes == 0 {
            return Err(ConfigError::Invalid("num_nodes must be non-zero"));
        }
        if self.num_workers == 0 {
            return Err(ConfigError::Invalid("num_workers must be non-zero"));
        }
        if self.pubsub_nodes > self.num_nodes {
            return Err(ConfigError::Invalid("pubsub_nodes must not exceed num_nodes"));
        }
        if self.ipns_quorum == 0 {
            return Err(ConfigError::Invalid("ipns_quorum must be non-zero"));
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_nodes: 1,
            num_workers: 4,
            pubsub_nodes: 1,
            ipns_quorum: 1,
            crawl_interval: Duration::from_secs(60),
            cache_data: true,
            pin_files: true,
            pin_records: true,
            bootstrap_addrs: Vec::new(),
            testnet: false,
            uacomment: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_pubsub_nodes_over_num_nodes() {
        let cfg = EngineConfig {
            num_nodes: 2,
            pubsub_nodes: 3,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }
}
