use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;

use super::{handlers, middleware::auth_middleware, websocket::handle_websocket};
use crate::AppState;

pub const WEBHOOK_BODY_LIMIT: usize = 2 * 1024 * 1024;

pub fn create_router(state: AppState) -> Router<AppState> {
    // Public auth routes
    let auth_routes = Router::new()
        .route("/signup", post(handlers::auth::signup))
        .route("/login", post(handlers::auth::login));

    // User routes (protected)
    let user_routes = Router::new()
        .route(
            "/me",
            get(handlers::users::get_current_user).put(handlers::users::update_current_user),
        )
        .route(
            "/",
            get(handlers::users::list_users).post(handlers::users::invite_user),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Organization routes (protected)
    let organization_routes = Router::new()
        .route("/", get(handlers::organization::get_organization))
        .route(
            "/integrations",
            put(handlers::organization::update_integrations),
        )
        .route("/settings", put(handlers::organization::update_settings))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Campaign routes (protected)
    let campaign_routes = Router::new()
        .route(
            "/",
            get(handlers::campaigns::list_campaigns).post(handlers::campaigns::create_campaign),
        )
        .route(
            "/recompute",
            post(handlers::campaigns::recompute_all_campaigns),
        )
        .route(
            "/:id",
            get(handlers::campaigns::get_campaign).delete(handlers::campaigns::delete_campaign),
        )
        .route("/:id/status", put(handlers::campaigns::update_campaign_status))
        .route(
            "/:id/template",
            put(handlers::campaigns::update_campaign_template),
        )
        .route("/:id/recompute", post(handlers::campaigns::recompute_campaign))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Lead routes (protected)
    let lead_routes = Router::new()
        .route("/", get(handlers::leads::list_leads))
        .route("/stats", get(handlers::leads::lead_stats))
        .route(
            "/by-phone/:phone/messages",
            get(handlers::leads::messages_by_phone),
        )
        .route(
            "/:id",
            get(handlers::leads::get_lead).patch(handlers::leads::update_lead),
        )
        .route("/:id/messages", post(handlers::leads::record_message))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Conversation routes (protected)
    let conversation_routes = Router::new()
        .route("/", get(handlers::conversations::get_conversations))
        .route("/:id", get(handlers::conversations::get_conversation))
        .route("/:id/messages", get(handlers::conversations::get_messages))
        .route("/:id/read", post(handlers::conversations::mark_read))
        .route(
            "/:id/recompute",
            post(handlers::conversations::recompute_conversation),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Platform webhooks (signed, no bearer token)
    let webhook_routes = Router::new()
        .route("/meta", get(handlers::webhooks::meta_verify))
        .route("/:organization_id/leads", post(handlers::webhooks::meta_leads))
        .route(
            "/:organization_id/campaigns",
            post(handlers::webhooks::meta_campaigns),
        )
        .route("/:organization_id/whatsapp", post(handlers::webhooks::whatsapp))
        .layer(RequestBodyLimitLayer::new(WEBHOOK_BODY_LIMIT));

    // WebSocket route (protected)
    let ws_route = Router::new()
        .route("/ws", get(handle_websocket))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Combine all routes
    Router::new()
        .nest("/auth", auth_routes)
        .nest("/users", user_routes)
        .nest("/organization", organization_routes)
        .nest("/campaigns", campaign_routes)
        .nest("/leads", lead_routes)
        .nest("/conversations", conversation_routes)
        .nest("/webhooks", webhook_routes)
        .merge(ws_route)
        .with_state(state)
}
