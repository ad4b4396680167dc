use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{LeadStatus, StatusCount};

/// An advertising campaign on an external platform. `(organization_id,
/// external_id)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub external_id: String,
    pub external_ad_account_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub platform: CampaignPlatform,
    pub status: CampaignStatus,
    pub template_name: Option<String>,
    #[sqlx(flatten)]
    pub metrics: CampaignMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "campaign_platform")]
pub enum CampaignPlatform {
    Facebook,
    Instagram,
    Google,
    WhatsApp,
    Email,
    Other,
}

impl Default for CampaignPlatform {
    fn default() -> Self {
        Self::Facebook
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "campaign_status")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
    Draft,
}

impl Default for CampaignStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// Cached lead counters. Derived from the lead table; `recompute` is the
/// source of truth when the incremental path drifts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CampaignMetrics {
    pub total_leads: i64,
    pub contacted_leads: i64,
    pub converted_leads: i64,
    pub last_updated: DateTime<Utc>,
}

impl CampaignMetrics {
    pub fn empty(at: DateTime<Utc>) -> Self {
        Self {
            total_leads: 0,
            contacted_leads: 0,
            converted_leads: 0,
            last_updated: at,
        }
    }

    /// Builds the metrics block from per-status lead counts.
    pub fn from_status_counts(counts: &[StatusCount], at: DateTime<Utc>) -> Self {
        let mut metrics = Self::empty(at);
        for StatusCount { status, count } in counts {
            metrics.total_leads += count;
            if status.counts_as_contacted() {
                metrics.contacted_leads += count;
            }
            if status.counts_as_converted() {
                metrics.converted_leads += count;
            }
        }
        metrics
    }

    pub fn apply(&mut self, delta: MetricsDelta, at: DateTime<Utc>) {
        self.total_leads += delta.total;
        self.contacted_leads += delta.contacted;
        self.converted_leads += delta.converted;
        self.last_updated = at;
    }
}

/// Signed change to the cached counters, applied atomically by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsDelta {
    pub total: i64,
    pub contacted: i64,
    pub converted: i64,
}

impl MetricsDelta {
    pub fn for_new_lead(status: LeadStatus) -> Self {
        Self {
            total: 1,
            contacted: status.counts_as_contacted() as i64,
            converted: status.counts_as_converted() as i64,
        }
    }

    pub fn between(from: LeadStatus, to: LeadStatus) -> Self {
        Self {
            total: 0,
            contacted: to.counts_as_contacted() as i64 - from.counts_as_contacted() as i64,
            converted: to.counts_as_converted() as i64 - from.counts_as_converted() as i64,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub organization_id: Uuid,
    pub external_id: String,
    pub external_ad_account_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub platform: CampaignPlatform,
    pub status: CampaignStatus,
}
