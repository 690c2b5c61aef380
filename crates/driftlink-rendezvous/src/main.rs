//! `driftlink-rendezvous` binary entry point: parses [`config::RendezvousConfig`],
//! builds a [`store::SessionStore`], and serves the `/ws` signaling route and
//! a `/health` check behind `tower_http`'s CORS and tracing layers — the
//! same shape as `umbra-relay::main`'s router assembly.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use driftlink_rendezvous::config::RendezvousConfig;
use driftlink_rendezvous::session::SessionRegistry;
use driftlink_rendezvous::signaling::{ws_handler, SignalingState};
use driftlink_rendezvous::store::{InMemoryStore, SessionStore};

#[cfg(feature = "redis-store")]
use driftlink_rendezvous::redis_store::RedisStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "driftlink_rendezvous=info,tower_http=info".into()),
        )
        .init();

    let config = RendezvousConfig::parse();
    let ttl = Duration::from_secs(config.session_ttl_secs);

    let store = build_store(&config).await;
    let registry = Arc::new(SessionRegistry::new(store, ttl));
    let signaling_state = SignalingState::new(registry);

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(signaling_state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(addr = addr.as_str(), "driftlink-rendezvous starting");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    axum::serve(listener, app).await.expect("server error");
}

#[cfg(not(feature = "redis-store"))]
async fn build_store(config: &RendezvousConfig) -> Arc<dyn SessionStore> {
    let store = InMemoryStore::new();
    store.spawn_sweeper(Duration::from_secs(config.cleanup_interval_secs));
    store
}

#[cfg(feature = "redis-store")]
async fn build_store(config: &RendezvousConfig) -> Arc<dyn SessionStore> {
    match RedisStore::connect(
        &config.redis_host,
        config.redis_port,
        config.redis_password.as_deref(),
    )
    .await
    {
        Ok(store) => {
            tracing::info!(
                host = config.redis_host.as_str(),
                port = config.redis_port,
                "using Redis session store"
            );
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, falling back to in-memory store");
            let store = InMemoryStore::new();
            store.spawn_sweeper(Duration::from_secs(config.cleanup_interval_secs));
            store
        }
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "driftlink-rendezvous",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
