use serde::Serialize;

pub mod auth;
pub mod campaigns;
pub mod conversations;
pub mod leads;
pub mod organization;
pub mod users;
pub mod webhooks;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Clamps a requested page size into `1..=max`, using `default` when absent.
pub fn page_limit(requested: Option<i64>, default: i64, max: i64) -> i64 {
    requested.unwrap_or(default).clamp(1, max)
}
