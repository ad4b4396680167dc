//! Inbound platform webhooks. No bearer token: payloads are authenticated
//! by an HMAC over the raw body when a shared secret is configured.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{LeadFilter, MediaMetadata, MessageDirection, MessageStatus, MessageType},
    services::{
        conversations::{AppendMessage, ConversationService},
        ingestion::{BatchFailure, BatchReport, CampaignPayload, IngestionService, LeadPayload},
        phone::normalize_phone,
        signature::{verify_signature, SIGNATURE_HEADER},
    },
    store::EntityStore,
    AppState,
};

/// Subscription handshake: echo `hub.challenge` when the token matches.
pub async fn meta_verify(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<String> {
    let expected = state
        .config
        .webhooks
        .meta_verify_token
        .as_deref()
        .ok_or(AppError::Forbidden)?;

    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);

    match (mode, token, params.get("hub.challenge")) {
        (Some("subscribe"), Some(token), Some(challenge)) if token == expected => {
            tracing::info!("Meta webhook subscription verified");
            Ok(challenge.clone())
        }
        _ => Err(AppError::Forbidden),
    }
}

fn authenticate(secret: Option<&str>, headers: &HeaderMap, body: &[u8]) -> AppResult<()> {
    let Some(secret) = secret else {
        return Ok(());
    };
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    verify_signature(secret, body, header).map_err(|e| {
        tracing::warn!("Rejected webhook with bad signature");
        e
    })
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> AppResult<T> {
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("invalid payload: {}", e)))
}

#[derive(Debug, Deserialize)]
pub struct LeadBatch {
    pub leads: Vec<LeadPayload>,
}

pub async fn meta_leads(
    State(state): State<AppState>,
    Path(organization_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<BatchReport>> {
    authenticate(state.config.webhooks.meta_app_secret.as_deref(), &headers, &body)?;
    let batch: LeadBatch = parse(&body)?;

    let report = IngestionService::new(state.store, state.events, state.config)
        .ingest_leads(organization_id, batch.leads)
        .await?;

    tracing::info!(
        "Lead webhook for {}: {} created, {} duplicates, {} failed",
        organization_id,
        report.created,
        report.duplicates,
        report.failed.len()
    );
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct CampaignBatch {
    pub campaigns: Vec<CampaignPayload>,
}

pub async fn meta_campaigns(
    State(state): State<AppState>,
    Path(organization_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<BatchReport>> {
    authenticate(state.config.webhooks.meta_app_secret.as_deref(), &headers, &body)?;
    let batch: CampaignBatch = parse(&body)?;

    let report = IngestionService::new(state.store, state.events, state.config)
        .ingest_campaigns(organization_id, batch.campaigns)
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WhatsappEvent {
    Message {
        external_id: Option<String>,
        phone: String,
        direction: MessageDirection,
        #[serde(default)]
        content: String,
        #[serde(default)]
        message_type: MessageType,
        #[serde(default)]
        metadata: MediaMetadata,
        timestamp: Option<DateTime<Utc>>,
    },
    Status {
        external_id: String,
        status: MessageStatus,
    },
}

impl WhatsappEvent {
    fn reference(&self) -> String {
        match self {
            WhatsappEvent::Message {
                external_id, phone, ..
            } => external_id.clone().unwrap_or_else(|| phone.clone()),
            WhatsappEvent::Status { external_id, .. } => external_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WhatsappBatch {
    pub events: Vec<WhatsappEvent>,
}

#[derive(Debug, Default, Serialize)]
pub struct WhatsappReport {
    pub appended: usize,
    pub duplicates: usize,
    pub status_updates: usize,
    pub ignored: usize,
    pub failed: Vec<BatchFailure>,
}

pub async fn whatsapp(
    State(state): State<AppState>,
    Path(organization_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WhatsappReport>> {
    authenticate(state.config.webhooks.whatsapp_secret.as_deref(), &headers, &body)?;
    let batch: WhatsappBatch = parse(&body)?;

    if batch.events.len() > state.config.ingest.max_batch_size {
        return Err(AppError::Validation(format!(
            "batch of {} exceeds the limit of {}",
            batch.events.len(),
            state.config.ingest.max_batch_size
        )));
    }
    state
        .store
        .get_organization(organization_id)
        .await?
        .ok_or(AppError::OrganizationNotFound)?;

    let country_code = state.config.ingest.default_country_code.clone();
    let conversations =
        ConversationService::new(state.store.clone(), state.events.clone(), state.config.clone());

    let mut report = WhatsappReport::default();
    for event in batch.events {
        let reference = event.reference();
        let result = match event {
            WhatsappEvent::Message {
                external_id,
                phone,
                direction,
                content,
                message_type,
                metadata,
                timestamp,
            } => {
                let lead_id = lead_for_message(
                    state.store.as_ref(),
                    organization_id,
                    external_id.as_deref(),
                    &phone,
                    &country_code,
                )
                .await;
                match lead_id {
                    Ok(lead_id) => conversations
                        .append_message(
                            organization_id,
                            AppendMessage {
                                lead_id,
                                direction,
                                content,
                                message_type,
                                external_id,
                                metadata,
                                occurred_at: timestamp,
                            },
                        )
                        .await
                        .map(|outcome| {
                            if outcome.created {
                                report.appended += 1;
                            } else {
                                report.duplicates += 1;
                            }
                        }),
                    Err(e) => Err(e),
                }
            }
            WhatsappEvent::Status {
                external_id,
                status,
            } => conversations
                .update_message_status(organization_id, &external_id, status)
                .await
                .map(|outcome| {
                    if outcome.changed {
                        report.status_updates += 1;
                    } else {
                        report.ignored += 1;
                    }
                }),
        };

        if let Err(e) = result {
            report.failed.push(BatchFailure {
                external_id: reference,
                error: e.to_string(),
            });
        }
    }

    Ok(Json(report))
}

/// A redelivered message keeps the lead it was first stored against, even
/// if its phone no longer resolves.
async fn lead_for_message(
    store: &dyn EntityStore,
    organization_id: Uuid,
    external_id: Option<&str>,
    raw_phone: &str,
    country_code: &str,
) -> AppResult<Uuid> {
    if let Some(external_id) = external_id.map(str::trim).filter(|id| !id.is_empty()) {
        if let Some(existing) = store.find_message_by_external_id(external_id).await? {
            return Ok(existing.lead_id);
        }
    }
    resolve_lead(store, organization_id, raw_phone, country_code).await
}

/// Inbound messages identify the lead by phone. The newest lead wins when
/// several share a number.
async fn resolve_lead(
    store: &dyn EntityStore,
    organization_id: Uuid,
    raw_phone: &str,
    country_code: &str,
) -> AppResult<Uuid> {
    let phone = normalize_phone(raw_phone, country_code)
        .ok_or_else(|| AppError::Validation("phone is required".to_string()))?;

    let leads = store
        .query_leads(
            organization_id,
            &LeadFilter {
                phone: Some(phone),
                limit: 1,
                ..Default::default()
            },
        )
        .await?;

    leads
        .first()
        .map(|lead| lead.id)
        .ok_or(AppError::LeadNotFound)
}
