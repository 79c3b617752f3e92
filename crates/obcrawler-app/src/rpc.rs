//! Thin downstream surface: a lookup of a peer's cached signed record, and
//! an SSE bridge from one [`obcrawler_core::Subscription`] to HTTP. This
//! module contains no crawl logic — it only re-serves what the engine has
//! already materialized.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::{Stream, StreamExt as _};
use obcrawler_core::job::CrawledObject;
use obcrawler_core::{Crawler, Store};
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone)]
pub struct RpcState {
    pub crawler: Arc<Crawler>,
    pub store: Arc<dyn Store>,
}

pub fn router(state: RpcState) -> Router {
    Router::new()
        .route("/peers/:peer_id", get(get_peer))
        .route("/subscribe", get(subscribe))
        .with_state(state)
}

async fn get_peer(
    State(state): State<RpcState>,
    Path(peer_id): Path<String>,
) -> impl IntoResponse {
    let Ok(peer_id) = libp2p_identity::PeerId::from_str(&peer_id) else {
        return (StatusCode::BAD_REQUEST, "invalid peer id").into_response();
    };
    match state.store.get_peer(peer_id).await {
        Ok(Some(peer)) => match peer.ipns_record {
            Some(bytes) => ([("content-type", "application/octet-stream")], bytes).into_response(),
            None => (StatusCode::NOT_FOUND, "no record yet").into_response(),
        },
        Ok(None) => (StatusCode::NOT_FOUND, "unknown peer").into_response(),
        Err(e) => {
            tracing::warn!(%peer_id, error = %e, "peer lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "lookup failed").into_response()
        }
    }
}

/// One message per crawled object: `{expiration_timestamp, union{profile,
/// signed_listing}}`, re-emitting the source document fields unchanged
/// except for the added expiration.
async fn subscribe(
    State(state): State<RpcState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.crawler.subscribe().await;
    let stream = tokio_stream::wrappers::ReceiverStream::new(subscription.receiver)
        .map(|object| Ok(Event::default().data(to_wire(&object).to_string())));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_wire(object: &CrawledObject) -> serde_json::Value {
    match object {
        CrawledObject::Profile {
            profile, expiration, ..
        } => serde_json::json!({
            "expiration_timestamp": expiration.as_secs(),
            "profile": profile,
        }),
        CrawledObject::SignedListing {
            listing, expiration, ..
        } => serde_json::json!({
            "expiration_timestamp": expiration.as_secs(),
            "signed_listing": listing,
        }),
    }
}
