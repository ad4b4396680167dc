use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const DEFAULT_WATI_BASE_URL: &str = "https://api.wati.io";

/// Tenant root. Every other entity is scoped to one organization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Option<Uuid>,
    #[sqlx(flatten)]
    pub integrations: Integrations,
    #[sqlx(flatten)]
    pub settings: OrganizationSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct Integrations {
    #[sqlx(flatten)]
    pub meta: MetaIntegration,
    #[sqlx(flatten)]
    pub wati: WatiIntegration,
    #[sqlx(flatten)]
    pub google: GoogleIntegration,
}

// Tokens are write-only through the API.

#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct MetaIntegration {
    #[serde(rename = "page_id")]
    pub meta_page_id: Option<String>,
    #[serde(skip_serializing, default)]
    pub meta_access_token: Option<String>,
    #[serde(rename = "is_valid")]
    pub meta_is_valid: bool,
    #[serde(rename = "last_sync")]
    pub meta_last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WatiIntegration {
    #[serde(skip_serializing, default)]
    pub wati_api_token: Option<String>,
    #[serde(rename = "base_url")]
    pub wati_base_url: String,
    #[serde(rename = "is_valid")]
    pub wati_is_valid: bool,
}

impl Default for WatiIntegration {
    fn default() -> Self {
        Self {
            wati_api_token: None,
            wati_base_url: DEFAULT_WATI_BASE_URL.to_string(),
            wati_is_valid: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct GoogleIntegration {
    #[serde(skip_serializing, default)]
    pub google_access_token: Option<String>,
    #[serde(skip_serializing, default)]
    pub google_refresh_token: Option<String>,
    #[serde(rename = "is_connected")]
    pub google_is_connected: bool,
    #[serde(rename = "email")]
    pub google_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct OrganizationSettings {
    pub timezone: String,
    pub currency: String,
}

impl Default for OrganizationSettings {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub id: Uuid,
    pub name: String,
}

/// Partial update of the Meta and WhatsApp provider credentials.
/// `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntegrationsUpdate {
    pub meta_page_id: Option<String>,
    pub meta_access_token: Option<String>,
    pub wati_api_token: Option<String>,
    pub wati_base_url: Option<String>,
}

impl IntegrationsUpdate {
    pub fn is_empty(&self) -> bool {
        self.meta_page_id.is_none()
            && self.meta_access_token.is_none()
            && self.wati_api_token.is_none()
            && self.wati_base_url.is_none()
    }

    /// Applies the update in place. A changed token invalidates the
    /// corresponding validity flag until it is checked again.
    pub fn apply_to(&self, integrations: &mut Integrations) {
        if let Some(page_id) = &self.meta_page_id {
            integrations.meta.meta_page_id = Some(page_id.clone());
        }
        if let Some(token) = &self.meta_access_token {
            if integrations.meta.meta_access_token.as_ref() != Some(token) {
                integrations.meta.meta_is_valid = false;
            }
            integrations.meta.meta_access_token = Some(token.clone());
        }
        if let Some(token) = &self.wati_api_token {
            if integrations.wati.wati_api_token.as_ref() != Some(token) {
                integrations.wati.wati_is_valid = false;
            }
            integrations.wati.wati_api_token = Some(token.clone());
        }
        if let Some(base_url) = &self.wati_base_url {
            integrations.wati.wati_base_url = base_url.clone();
        }
    }
}
