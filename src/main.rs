use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mets_leads_backend::{
    api::websocket::WsHub, build_app, config::Config, storage::redis::RedisClient,
    store::PgStore, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mets_leads_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load();
    tracing::info!("Starting server in {} mode", config.server.environment);
    config.warn_on_unsigned_webhooks();

    // Initialize database pool
    let db = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database_url())
        .await?;
    tracing::info!("Connected to PostgreSQL");

    // Run migrations
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("Database migrations completed");

    // Initialize Redis
    let redis = RedisClient::new(&config.redis_url()).await?;
    tracing::info!("Connected to Redis");

    // Relay published events to this instance's sockets
    let ws_hub = Arc::new(WsHub::new());
    tokio::spawn(ws_hub.clone().relay(redis.clone()));

    let state = AppState {
        store: Arc::new(PgStore::new(db)),
        events: Arc::new(redis),
        config: Arc::new(config.clone()),
        ws_hub,
    };

    let app = build_app(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
