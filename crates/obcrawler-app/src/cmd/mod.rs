//! Subcommand dispatch. Mirrors the teacher's `fendermint_app::cmd` module:
//! a thin match over [`crate::options::Commands`] that loads settings, builds
//! the pieces the engine needs, and delegates to `obcrawler-core`.

use crate::options::{Commands, Options};
use crate::settings::Settings;
use anyhow::{bail, Context};
use obcrawler_core::{Crawler, NodePool, SqlStore, Store};
use std::str::FromStr;
use std::sync::Arc;

/// Process exit codes, mirroring the teacher's `AppExitCode`.
#[derive(Debug, Clone, Copy)]
pub enum AppExitCode {
    Ok = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl AppExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

pub async fn exec(opts: &Options, settings: Settings) -> anyhow::Result<AppExitCode> {
    if let Err(e) = settings.validate() {
        tracing::error!(error = %e, "invalid configuration");
        return Ok(AppExitCode::ConfigError);
    }

    match &opts.command {
        Commands::ConfigCheck => {
            tracing::info!("configuration is valid");
            Ok(AppExitCode::Ok)
        }
        Commands::Run => run(settings).await,
        Commands::Crawl { peer_id, pin_record } => {
            manual_action(settings, peer_id, |crawler, peer_id| {
                let pin_record = *pin_record;
                Box::pin(async move { crawler.crawl_node(peer_id, pin_record).await.map_err(Into::into) })
            })
            .await
        }
        Commands::Ban { peer_id } => {
            manual_action(settings, peer_id, |crawler, peer_id| {
                Box::pin(async move { crawler.ban_node(peer_id).await.map_err(Into::into) })
            })
            .await
        }
        Commands::Unban { peer_id } => {
            manual_action(settings, peer_id, |crawler, peer_id| {
                Box::pin(async move { crawler.unban_node(peer_id).await.map_err(Into::into) })
            })
            .await
        }
    }
}

type ManualFut<'a> = std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// `crawl`/`ban`/`unban` all share the same shape: stand up an embedded
/// engine against the configured store and node pool, perform one action,
/// then tear down. A deployment with a long-running `run` process would
/// instead route these through that process's control surface; this
/// single-process path is the one the spec calls out as sufficient for
/// test/dev usage.
async fn manual_action<'a, F>(settings: Settings, peer_id: &str, action: F) -> anyhow::Result<AppExitCode>
where
    F: for<'b> FnOnce(&'b Crawler, libp2p_identity::PeerId) -> ManualFut<'b>,
{
    let peer_id = libp2p_identity::PeerId::from_str(peer_id).context("invalid peer id")?;
    let store = build_store(&settings).await?;
    let pool = node_pool_from_settings(&settings)?;
    let (_events_tx, events_rx) = tokio::sync::mpsc::channel(1);
    let crawler = Crawler::start(store, pool, settings.to_engine_config(), events_rx).await?;

    let result = action(&crawler, peer_id).await;
    crawler.shutdown().await;
    result?;
    Ok(AppExitCode::Ok)
}

async fn run(settings: Settings) -> anyhow::Result<AppExitCode> {
    if let Some(addr) = &settings.metrics_listen_addr {
        let addr = addr.parse().context("invalid metrics listen address")?;
        prometheus_exporter::start(addr).context("starting prometheus exporter")?;
        tracing::info!(%addr, "metrics listening");
    }

    let store = build_store(&settings).await?;
    let pool = node_pool_from_settings(&settings)?;
    let (_events_tx, events_rx) = tokio::sync::mpsc::channel(16);
    let crawler = Arc::new(Crawler::start(store.clone(), pool, settings.to_engine_config(), events_rx).await?);

    let rpc_state = crate::rpc::RpcState {
        crawler: crawler.clone(),
        store,
    };
    let app = crate::rpc::router(rpc_state);
    let listener = tokio::net::TcpListener::bind(&settings.rpc_listen_addr)
        .await
        .with_context(|| format!("binding RPC listener on {}", settings.rpc_listen_addr))?;
    tracing::info!(addr = %settings.rpc_listen_addr, "rpc listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("rpc server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    match Arc::try_unwrap(crawler) {
        Ok(crawler) => crawler.shutdown().await,
        Err(_) => tracing::warn!("rpc handlers still held a reference at shutdown"),
    }
    Ok(AppExitCode::Ok)
}

async fn build_store(settings: &Settings) -> anyhow::Result<Arc<dyn Store>> {
    let store = SqlStore::connect(&settings.database_url)
        .await
        .with_context(|| format!("connecting to {}", settings.database_url))?;
    Ok(Arc::new(store))
}

/// The embedded content-addressed node runtime is an external collaborator
/// (spec section 1): this binary does not link a concrete `Node`
/// implementation for it. Wiring one in — an embedded libp2p swarm, or an
/// HTTP client against an out-of-process daemon — is deployment-specific
/// and out of scope here.
fn node_pool_from_settings(_settings: &Settings) -> anyhow::Result<NodePool> {
    bail!(
        "no content node backend is linked into this binary; `obcrawler_core::node::Node` \
         must be implemented by the embedded node runtime the deployment provides"
    )
}
