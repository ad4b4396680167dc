use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::MessageDirection;

/// A prospect captured from an ad form. `external_id` is unique across all
/// organizations; `phone` is the join key for messaging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Lead {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub external_id: String,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub status: LeadStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "lead_status")]
pub enum LeadStatus {
    New,
    Contacted,
    Responded,
    Converted,
    Lost,
    Qualified,
}

impl Default for LeadStatus {
    fn default() -> Self {
        Self::New
    }
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 6] = [
        Self::New,
        Self::Contacted,
        Self::Responded,
        Self::Converted,
        Self::Lost,
        Self::Qualified,
    ];

    /// Leads that have been reached out to, counted in `contacted_leads`.
    pub fn counts_as_contacted(self) -> bool {
        matches!(
            self,
            Self::Contacted | Self::Responded | Self::Qualified | Self::Converted
        )
    }

    pub fn counts_as_converted(self) -> bool {
        self == Self::Converted
    }

    /// Status a message in `direction` moves the lead to, if any.
    ///
    /// Messages only ever advance the early pipeline stages; anything a
    /// staff member has set beyond `Contacted` is left alone.
    pub fn after_message(self, direction: MessageDirection) -> Option<LeadStatus> {
        match (self, direction) {
            (Self::New, MessageDirection::Outbound) => Some(Self::Contacted),
            (Self::New | Self::Contacted, MessageDirection::Inbound) => Some(Self::Responded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewLead {
    pub organization_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub external_id: String,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

/// The slice of a lead the conversation sidebar needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadSummary {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub status: LeadStatus,
}

impl From<&Lead> for LeadSummary {
    fn from(lead: &Lead) -> Self {
        Self {
            id: lead.id,
            name: lead.name.clone(),
            phone: lead.phone.clone(),
            status: lead.status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StatusCount {
    pub status: LeadStatus,
    pub count: i64,
}

/// Read-side filter for the lead listings.
#[derive(Debug, Clone, Default)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    pub campaign_id: Option<Uuid>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub phone: Option<String>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl LeadFilter {
    /// Whether `lead` passes every criterion except paging.
    pub fn matches(&self, lead: &Lead) -> bool {
        if self.status.is_some_and(|status| status != lead.status) {
            return false;
        }
        if self.campaign_id.is_some() && self.campaign_id != lead.campaign_id {
            return false;
        }
        if self.created_from.is_some_and(|from| lead.created_at < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| lead.created_at >= to) {
            return false;
        }
        if self.phone.as_ref().is_some_and(|phone| phone != &lead.phone) {
            return false;
        }
        if let Some(term) = &self.search {
            let term = term.to_lowercase();
            if !lead.name.to_lowercase().contains(&term) && !lead.phone.contains(&term) {
                return false;
            }
        }
        true
    }
}
