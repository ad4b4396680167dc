use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::UserRole,
    services::auth::{AuthService, Claims},
    AppState,
};

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(AppError::Unauthorized)?;

    let auth_service = AuthService::new(state.store.clone(), state.config.clone());
    let claims = auth_service.validate_token(bearer.token())?;

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

pub fn get_user_id(claims: &Claims) -> AppResult<Uuid> {
    Uuid::parse_str(&claims.sub).map_err(|_| AppError::InvalidToken)
}

pub fn get_org_id(claims: &Claims) -> AppResult<Uuid> {
    Uuid::parse_str(&claims.org).map_err(|_| AppError::InvalidToken)
}

/// Fails with `Forbidden` unless the caller holds at least `required`.
pub fn require_role(claims: &Claims, required: UserRole) -> AppResult<()> {
    if claims.role.at_least(required) {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
