//! Backend for the Meta lead dashboard: idempotent lead and campaign
//! ingestion, the WhatsApp conversation log, and the dashboard REST API.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;
pub mod store;

use config::Config;
use services::events::EventPublisher;
use store::EntityStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
    pub events: Arc<dyn EventPublisher>,
    pub config: Arc<Config>,
    pub ws_hub: Arc<api::websocket::WsHub>,
}

/// Full HTTP application: `/health` plus the versioned API.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api::router::create_router(state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
