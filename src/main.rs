mod api;
mod codes;
mod config;
mod error;
mod gateway;
mod images;
mod orchestrator;
mod protocol;
mod scoring;
mod service;
mod state;
mod store;
mod types;
mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;
use crate::images::{ImageConfig, MockProvider, ImageService};
use crate::state::AppState;
use crate::store::{RedisStore, RoomStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promptguessr=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Prompt Guessr...");

    let config = AppConfig::from_env();

    let images = match config.images.build_service() {
        Ok(service) => {
            tracing::info!(
                provider = service.provider_name(),
                fallback = ?service.fallback_name(),
                "Image generation initialized"
            );
            service
        }
        Err(err) => {
            tracing::warn!(
                "Image provider misconfigured ({}), falling back to the mock provider",
                err
            );
            ImageService::new(
                Box::new(MockProvider::new()),
                None,
                ImageConfig::default().request_timeout,
            )
        }
    };

    let store: Arc<dyn RoomStore> = match RedisStore::connect(&config.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::error!("Could not reach the KV store at startup: {}", err);
            std::process::exit(1);
        }
    };

    let port = config.port;
    let cors = config.cors_layer();
    let state = Arc::new(AppState::new(config, store, images));

    if state.store.ping().await.is_ok() {
        state.mark_ready();
        tracing::info!("KV store initialized");
    }

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/rooms/create", post(api::create_room))
        .route("/rooms/join", post(api::join_room))
        .route("/rooms/{code}", get(api::get_room))
        .route("/health", get(api::health))
        .route("/ready", get(api::ready))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind listener");
    axum::serve(listener, app).await.expect("serve");
}
