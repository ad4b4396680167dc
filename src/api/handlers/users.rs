use axum::{extract::State, Extension, Json};
use serde::Deserialize;

use crate::{
    error::AppResult,
    models::{User, UserRole},
    services::{
        auth::{AuthService, Claims, InviteInput},
        organizations::OrganizationService,
    },
    AppState,
};

use super::super::middleware::{get_org_id, get_user_id, require_role};

pub async fn get_current_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<User>> {
    let organization_id = get_org_id(&claims)?;
    let user_id = get_user_id(&claims)?;

    let user = OrganizationService::new(state.store)
        .get_user(organization_id, user_id)
        .await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: String,
}

pub async fn update_current_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    let organization_id = get_org_id(&claims)?;
    let user_id = get_user_id(&claims)?;

    let user = OrganizationService::new(state.store)
        .rename_user(organization_id, user_id, &req.name)
        .await?;
    Ok(Json(user))
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<User>>> {
    let organization_id = get_org_id(&claims)?;

    let users = OrganizationService::new(state.store)
        .list_users(organization_id)
        .await?;
    Ok(Json(users))
}

#[derive(Debug, Deserialize)]
pub struct InviteUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default = "default_invite_role")]
    pub role: UserRole,
}

fn default_invite_role() -> UserRole {
    UserRole::Viewer
}

pub async fn invite_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<InviteUserRequest>,
) -> AppResult<Json<User>> {
    require_role(&claims, UserRole::Admin)?;
    let organization_id = get_org_id(&claims)?;

    let auth_service = AuthService::new(state.store, state.config);
    let user = auth_service
        .invite_user(
            organization_id,
            InviteInput {
                name: req.name,
                email: req.email,
                password: req.password,
                role: req.role,
            },
        )
        .await?;

    Ok(Json(user))
}
