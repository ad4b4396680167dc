use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppResult,
    models::{AccessToken, Organization, User},
    services::auth::{AuthService, SignupInput},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub organization_name: String,
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub organization: Organization,
    pub user: User,
    pub token: AccessToken,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> AppResult<Json<SignupResponse>> {
    let auth_service = AuthService::new(state.store, state.config);
    let (organization, user, token) = auth_service
        .signup(SignupInput {
            organization_name: req.organization_name,
            name: req.name,
            email: req.email,
            password: req.password,
        })
        .await?;

    Ok(Json(SignupResponse {
        organization,
        user,
        token,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: User,
    pub token: AccessToken,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let auth_service = AuthService::new(state.store, state.config);
    let (user, token) = auth_service.login(&req.email, &req.password).await?;

    Ok(Json(LoginResponse { user, token }))
}
