use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Conversation, ConversationWithLead, Message, MessageFilter, UserRole},
    services::{auth::Claims, conversations::ConversationService},
    AppState,
};

use super::super::middleware::{get_org_id, require_role};
use super::page_limit;

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    /// Only messages created strictly after this instant.
    pub after: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl From<MessagesQuery> for MessageFilter {
    fn from(query: MessagesQuery) -> Self {
        MessageFilter {
            after: query.after,
            limit: page_limit(query.limit, 100, 500),
        }
    }
}

pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PaginationQuery>,
) -> AppResult<Json<Vec<ConversationWithLead>>> {
    let organization_id = get_org_id(&claims)?;

    let conversations = ConversationService::new(state.store, state.events, state.config)
        .list_conversations(
            organization_id,
            page_limit(query.limit, 50, 200),
            query.offset.max(0),
        )
        .await?;
    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<ConversationWithLead>> {
    let organization_id = get_org_id(&claims)?;

    let conversation = ConversationService::new(state.store, state.events, state.config)
        .get_conversation(organization_id, conversation_id)
        .await?;
    Ok(Json(conversation))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let organization_id = get_org_id(&claims)?;

    let messages = ConversationService::new(state.store, state.events, state.config)
        .list_messages(organization_id, conversation_id, &query.into())
        .await?;
    Ok(Json(messages))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Conversation>> {
    require_role(&claims, UserRole::Editor)?;
    let organization_id = get_org_id(&claims)?;

    let conversation = ConversationService::new(state.store, state.events, state.config)
        .mark_conversation_read(organization_id, conversation_id)
        .await?;
    Ok(Json(conversation))
}

pub async fn recompute_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Conversation>> {
    require_role(&claims, UserRole::Manager)?;
    let organization_id = get_org_id(&claims)?;

    let conversation = ConversationService::new(state.store, state.events, state.config)
        .recompute_conversation_projection(organization_id, conversation_id)
        .await?;
    Ok(Json(conversation))
}
