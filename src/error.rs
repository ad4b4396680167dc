use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    // Auth errors
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Insufficient role")]
    Forbidden,
    #[error("Invalid webhook signature")]
    InvalidSignature,

    // Account errors
    #[error("User not found")]
    UserNotFound,
    #[error("User already exists")]
    UserAlreadyExists,
    #[error("Organization not found")]
    OrganizationNotFound,

    // Pipeline errors
    #[error("Campaign not found")]
    CampaignNotFound,
    #[error("Lead not found")]
    LeadNotFound,
    #[error("Lead {0} belongs to another organization")]
    CrossTenantLead(String),

    // Conversation errors
    #[error("Conversation not found")]
    ConversationNotFound,
    #[error("Message not found")]
    MessageNotFound,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),

    // Store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // Redis errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // JWT errors
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    // Internal errors
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.into())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,

            AppError::InvalidCredentials
            | AppError::InvalidToken
            | AppError::Unauthorized
            | AppError::InvalidSignature
            | AppError::Jwt(_) => StatusCode::UNAUTHORIZED,

            AppError::Forbidden => StatusCode::FORBIDDEN,

            AppError::UserNotFound
            | AppError::OrganizationNotFound
            | AppError::CampaignNotFound
            | AppError::LeadNotFound
            | AppError::ConversationNotFound
            | AppError::MessageNotFound => StatusCode::NOT_FOUND,

            AppError::UserAlreadyExists | AppError::CrossTenantLead(_) | AppError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            AppError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,

            AppError::Store(_) | AppError::Redis(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::Jwt(_) => "Invalid token".to_string(),
            AppError::Store(StoreError::Conflict(constraint)) => {
                format!("Duplicate {}", constraint)
            }
            AppError::Store(e) => {
                tracing::error!("Store error: {}", e);
                "Database error".to_string()
            }
            AppError::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                "Cache error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Validation(msg) | AppError::BadRequest(msg) => msg.clone(),
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
