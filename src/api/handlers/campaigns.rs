use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Campaign, CampaignPlatform, CampaignStatus, UserRole},
    services::{
        auth::Claims,
        campaigns::CampaignService,
        ingestion::{manual_external_id, CampaignIngest, CampaignPayload, IngestionService},
    },
    AppState,
};

use super::super::middleware::{get_org_id, require_role};
use super::MessageResponse;

pub async fn list_campaigns(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<Campaign>>> {
    let organization_id = get_org_id(&claims)?;

    let campaigns = CampaignService::new(state.store, state.events)
        .list(organization_id)
        .await?;
    Ok(Json(campaigns))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<Json<Campaign>> {
    let organization_id = get_org_id(&claims)?;

    let campaign = CampaignService::new(state.store, state.events)
        .get(organization_id, campaign_id)
        .await?;
    Ok(Json(campaign))
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub external_id: Option<String>,
    pub name: String,
    pub external_ad_account_id: Option<String>,
    pub description: Option<String>,
    pub platform: Option<CampaignPlatform>,
    pub status: Option<CampaignStatus>,
}

/// Manual creation; shares the idempotent path with platform sync.
pub async fn create_campaign(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCampaignRequest>,
) -> AppResult<Json<CampaignIngest>> {
    require_role(&claims, UserRole::Editor)?;
    let organization_id = get_org_id(&claims)?;

    let external_id = req
        .external_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(manual_external_id);

    let ingestion = IngestionService::new(state.store, state.events, state.config);
    let outcome = ingestion
        .ingest_campaign(
            organization_id,
            CampaignPayload {
                external_id,
                name: req.name,
                external_ad_account_id: req.external_ad_account_id,
                description: req.description,
                platform: req.platform,
                status: req.status,
            },
        )
        .await?;

    Ok(Json(outcome))
}

pub async fn delete_campaign(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    require_role(&claims, UserRole::Editor)?;
    let organization_id = get_org_id(&claims)?;

    CampaignService::new(state.store, state.events)
        .delete(organization_id, campaign_id)
        .await?;

    Ok(Json(MessageResponse {
        message: "Campaign deleted".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: CampaignStatus,
}

pub async fn update_campaign_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(campaign_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> AppResult<Json<Campaign>> {
    require_role(&claims, UserRole::Editor)?;
    let organization_id = get_org_id(&claims)?;

    let campaign = CampaignService::new(state.store, state.events)
        .set_status(organization_id, campaign_id, req.status)
        .await?;
    Ok(Json(campaign))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateRequest {
    pub template_name: Option<String>,
}

pub async fn update_campaign_template(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(campaign_id): Path<Uuid>,
    Json(req): Json<UpdateTemplateRequest>,
) -> AppResult<Json<Campaign>> {
    require_role(&claims, UserRole::Editor)?;
    let organization_id = get_org_id(&claims)?;

    let campaign = CampaignService::new(state.store, state.events)
        .set_template(organization_id, campaign_id, req.template_name.as_deref())
        .await?;
    Ok(Json(campaign))
}

pub async fn recompute_campaign(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<Json<Campaign>> {
    require_role(&claims, UserRole::Manager)?;
    let organization_id = get_org_id(&claims)?;

    let campaign = IngestionService::new(state.store, state.events, state.config)
        .recompute_campaign_metrics(organization_id, campaign_id)
        .await?;
    Ok(Json(campaign))
}

pub async fn recompute_all_campaigns(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<Campaign>>> {
    require_role(&claims, UserRole::Manager)?;
    let organization_id = get_org_id(&claims)?;

    let campaigns = IngestionService::new(state.store, state.events, state.config)
        .recompute_organization_metrics(organization_id)
        .await?;
    Ok(Json(campaigns))
}
