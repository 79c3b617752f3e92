//! Layered configuration loading, mirroring the teacher's settings crate:
//! a `default.toml` base, an optional `local.toml` override, then
//! environment variables prefixed `OC_` with `__` as the nesting
//! separator.

use crate::log_level::parse_log_level;
use config::{Config, ConfigError as RawConfigError, Environment, File};
use obcrawler_core::config::EngineConfig;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Engine(#[from] obcrawler_core::config::ConfigError),
    #[error("invalid log level {0:?}: {1}")]
    InvalidLogLevel(String, String),
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub num_nodes: usize,
    pub num_workers: usize,
    pub pubsub_nodes: usize,
    pub ipns_quorum: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub crawl_interval: Duration,
    pub disable_data_caching: bool,
    pub disable_file_pinning: bool,
    pub disable_ipns_pinning: bool,
    #[serde(default)]
    pub bootstrap_addrs: Vec<String>,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub uacomment: String,

    pub database_url: String,
    pub rpc_listen_addr: String,

    /// When set, `prometheus_exporter` serves `/metrics` on this address.
    #[serde(default)]
    pub metrics_listen_addr: Option<String>,

    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    pub fn new(config_dir: &Path, run_mode: &str) -> Result<Self, RawConfigError> {
        let c = Config::builder()
            .add_source(File::from(config_dir.join("default")).required(false))
            .add_source(File::from(config_dir.join(run_mode)).required(false))
            .add_source(File::from(config_dir.join("local")).required(false))
            .add_source(
                Environment::with_prefix("OC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        c.try_deserialize()
    }

    /// Enforces the invariants from spec.md section 6: non-zero counts,
    /// `pubsub_nodes <= num_nodes`, and (if set) a recognized log level.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.to_engine_config().validate()?;
        if let Some(level) = &self.log_level {
            parse_log_level(level).map_err(|e| ConfigError::InvalidLogLevel(level.clone(), e))?;
        }
        Ok(())
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            num_nodes: self.num_nodes,
            num_workers: self.num_workers,
            pubsub_nodes: self.pubsub_nodes,
            ipns_quorum: self.ipns_quorum,
            crawl_interval: self.crawl_interval,
            cache_data: !self.disable_data_caching,
            pin_files: !self.disable_file_pinning,
            pin_records: !self.disable_ipns_pinning,
            bootstrap_addrs: self.bootstrap_addrs.clone(),
            testnet: self.testnet,
            uacomment: self.uacomment.clone(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            num_nodes: 1,
            num_workers: 4,
            pubsub_nodes: 1,
            ipns_quorum: 1,
            crawl_interval: Duration::from_secs(60),
            disable_data_caching: false,
            disable_file_pinning: false,
            disable_ipns_pinning: false,
            bootstrap_addrs: Vec::new(),
            testnet: false,
            uacomment: String::new(),
            database_url: "sqlite::memory:".to_owned(),
            rpc_listen_addr: "127.0.0.1:8645".to_owned(),
            metrics_listen_addr: None,
            log_level: None,
            log_dir: None,
        }
    }
}
