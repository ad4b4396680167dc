use axum::{extract::State, Extension, Json};

use crate::{
    error::AppResult,
    models::{IntegrationsUpdate, Organization, OrganizationSettings, UserRole},
    services::{auth::Claims, organizations::OrganizationService},
    AppState,
};

use super::super::middleware::{get_org_id, require_role};

pub async fn get_organization(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Organization>> {
    let organization_id = get_org_id(&claims)?;

    let organization = OrganizationService::new(state.store)
        .get(organization_id)
        .await?;
    Ok(Json(organization))
}

pub async fn update_integrations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<IntegrationsUpdate>,
) -> AppResult<Json<Organization>> {
    require_role(&claims, UserRole::Admin)?;
    let organization_id = get_org_id(&claims)?;

    let organization = OrganizationService::new(state.store)
        .update_integrations(organization_id, req)
        .await?;
    Ok(Json(organization))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OrganizationSettings>,
) -> AppResult<Json<Organization>> {
    require_role(&claims, UserRole::Admin)?;
    let organization_id = get_org_id(&claims)?;

    let organization = OrganizationService::new(state.store)
        .update_settings(organization_id, req)
        .await?;
    Ok(Json(organization))
}
