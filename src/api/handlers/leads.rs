use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        Lead, LeadFilter, LeadStatus, MediaMetadata, Message, MessageDirection, MessageFilter,
        MessageType, UserRole,
    },
    services::{
        auth::Claims,
        conversations::{AppendMessage, AppendOutcome, ConversationService},
        leads::{LeadService, LeadStats, LeadUpdate},
        phone::normalize_phone,
    },
    AppState,
};

use super::super::middleware::{get_org_id, require_role};
use super::conversations::MessagesQuery;
use super::page_limit;

pub const DEFAULT_LEAD_PAGE: i64 = 50;
pub const MAX_LEAD_PAGE: i64 = 200;

#[derive(Debug, Default, Deserialize)]
pub struct LeadQuery {
    pub status: Option<LeadStatus>,
    pub campaign_id: Option<Uuid>,
    /// A single UTC day, `YYYY-MM-DD`.
    pub date: Option<NaiveDate>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub phone: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl LeadQuery {
    pub fn into_filter(self, country_code: &str) -> AppResult<LeadFilter> {
        let (created_from, created_to) = match self.date {
            Some(date) => {
                let start = date
                    .and_hms_opt(0, 0, 0)
                    .ok_or_else(|| AppError::BadRequest("invalid date".to_string()))?
                    .and_utc();
                (Some(start), Some(start + Duration::days(1)))
            }
            None => (self.from, self.to),
        };

        let phone = match self.phone.as_deref() {
            Some(raw) => Some(
                normalize_phone(raw, country_code)
                    .ok_or_else(|| AppError::BadRequest("invalid phone".to_string()))?,
            ),
            None => None,
        };

        Ok(LeadFilter {
            status: self.status,
            campaign_id: self.campaign_id,
            created_from,
            created_to,
            phone,
            search: self
                .search
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            limit: page_limit(self.limit, DEFAULT_LEAD_PAGE, MAX_LEAD_PAGE),
            offset: self.offset.unwrap_or(0).max(0),
        })
    }
}

pub async fn list_leads(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<LeadQuery>,
) -> AppResult<Json<Vec<Lead>>> {
    let organization_id = get_org_id(&claims)?;
    let filter = query.into_filter(&state.config.ingest.default_country_code)?;

    let leads = LeadService::new(state.store, state.events)
        .list(organization_id, &filter)
        .await?;
    Ok(Json(leads))
}

pub async fn lead_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<LeadStats>> {
    let organization_id = get_org_id(&claims)?;

    let stats = LeadService::new(state.store, state.events)
        .stats(organization_id)
        .await?;
    Ok(Json(stats))
}

pub async fn get_lead(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(lead_id): Path<Uuid>,
) -> AppResult<Json<Lead>> {
    let organization_id = get_org_id(&claims)?;

    let lead = LeadService::new(state.store, state.events)
        .get(organization_id, lead_id)
        .await?;
    Ok(Json(lead))
}

pub async fn update_lead(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(lead_id): Path<Uuid>,
    Json(req): Json<LeadUpdate>,
) -> AppResult<Json<Lead>> {
    require_role(&claims, UserRole::Editor)?;
    let organization_id = get_org_id(&claims)?;

    let lead = LeadService::new(state.store, state.events)
        .update_lead(organization_id, lead_id, req)
        .await?;
    Ok(Json(lead))
}

#[derive(Debug, Deserialize)]
pub struct RecordMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    pub external_id: Option<String>,
    #[serde(default)]
    pub metadata: MediaMetadata,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Records an outbound message the sender has already dispatched.
pub async fn record_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(lead_id): Path<Uuid>,
    Json(req): Json<RecordMessageRequest>,
) -> AppResult<Json<AppendOutcome>> {
    require_role(&claims, UserRole::Editor)?;
    let organization_id = get_org_id(&claims)?;

    let outcome = ConversationService::new(state.store, state.events, state.config)
        .append_message(
            organization_id,
            AppendMessage {
                lead_id,
                direction: MessageDirection::Outbound,
                content: req.content,
                message_type: req.message_type,
                external_id: req.external_id,
                metadata: req.metadata,
                occurred_at: req.occurred_at,
            },
        )
        .await?;
    Ok(Json(outcome))
}

pub async fn messages_by_phone(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(phone): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let organization_id = get_org_id(&claims)?;
    let filter: MessageFilter = query.into();

    let messages = ConversationService::new(state.store, state.events, state.config)
        .messages_for_phone(organization_id, &phone, &filter)
        .await?;
    Ok(Json(messages))
}
