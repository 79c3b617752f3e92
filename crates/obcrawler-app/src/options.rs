use crate::log_level::{parse_log_level, LogLevel};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "obcrawler", version, about = "Marketplace content crawler")]
pub struct Options {
    /// Directory holding `default.toml`, an optional `<mode>.toml`, and an
    /// optional `local.toml`.
    #[arg(long, short, env = "OC_CONFIG_DIR", default_value = "config")]
    pub config_dir: PathBuf,

    /// Config file stem to layer on top of `default.toml` (e.g. `dev`, `prod`).
    #[arg(long, env = "OC_RUN_MODE", default_value = "dev")]
    pub run_mode: String,

    /// Console log level or an arbitrary `tracing-subscriber` filter string.
    #[arg(long, value_parser = parse_log_level, default_value = "info")]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the crawl engine until shutdown.
    Run,
    /// Enqueue a manual crawl for a single peer.
    Crawl {
        peer_id: String,
        #[arg(long)]
        pin_record: bool,
    },
    /// Ban a peer: stop crawling it and release its pinned content.
    Ban { peer_id: String },
    /// Unban a previously banned peer.
    Unban { peer_id: String },
    /// Load and validate configuration, then exit.
    ConfigCheck,
}

pub fn parse() -> Options {
    Options::parse()
}
