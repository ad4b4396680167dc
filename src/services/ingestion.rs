//! Idempotent ingestion of externally sourced leads and campaigns.
//!
//! Upstream platforms deliver at least once. Every ingest is an
//! insert-or-fetch keyed on the external id: the unique index decides
//! which of two concurrent inserts wins, and the loser reads the winner's
//! row back and reports `created: false`.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{
        Campaign, CampaignMetrics, CampaignPlatform, CampaignStatus, Lead, MetricsDelta,
        NewCampaign, NewLead,
    },
    services::{
        events::{emit, EventKind, EventPublisher},
        phone::normalize_phone,
    },
    store::{Constraint, EntityStore},
};

#[derive(Debug, Clone, Deserialize)]
pub struct LeadPayload {
    pub external_id: String,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub campaign_external_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CampaignPayload {
    pub external_id: String,
    pub name: String,
    #[serde(default)]
    pub external_ad_account_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub platform: Option<CampaignPlatform>,
    #[serde(default)]
    pub status: Option<CampaignStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeadIngest {
    pub created: bool,
    pub lead: Lead,
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignIngest {
    pub created: bool,
    pub campaign: Campaign,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchFailure {
    pub external_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub created: usize,
    pub duplicates: usize,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    fn record(&mut self, external_id: &str, result: AppResult<bool>) {
        match result {
            Ok(true) => self.created += 1,
            Ok(false) => self.duplicates += 1,
            Err(e) => self.failed.push(BatchFailure {
                external_id: external_id.to_string(),
                error: e.to_string(),
            }),
        }
    }
}

/// External id for campaigns created by hand in the dashboard.
pub fn manual_external_id() -> String {
    format!("manual_{}", Uuid::new_v4())
}

pub struct IngestionService {
    store: Arc<dyn EntityStore>,
    events: Arc<dyn EventPublisher>,
    config: Arc<Config>,
}

impl IngestionService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        events: Arc<dyn EventPublisher>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    /// Stores a lead exactly once. A replay returns the stored record
    /// untouched so staff edits (status, note) survive re-syncs.
    pub async fn ingest_lead(
        &self,
        organization_id: Uuid,
        payload: LeadPayload,
    ) -> AppResult<LeadIngest> {
        let external_id = payload.external_id.trim();
        if external_id.is_empty() {
            return Err(AppError::Validation("external_id is required".to_string()));
        }
        let name = payload.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }
        let phone = normalize_phone(&payload.phone, &self.config.ingest.default_country_code)
            .ok_or_else(|| AppError::Validation("phone is required".to_string()))?;
        let email = payload
            .email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());

        if let Some(existing) = self.store.find_lead_by_external_id(external_id).await? {
            return self.replayed_lead(organization_id, existing);
        }

        let campaign_id = match payload.campaign_external_id.as_deref().map(str::trim) {
            Some(campaign_ref) if !campaign_ref.is_empty() => {
                let campaign = self
                    .store
                    .find_campaign_by_external_id(organization_id, campaign_ref)
                    .await?;
                if campaign.is_none() {
                    tracing::debug!(
                        "Lead {} references unknown campaign {}; storing unattached",
                        external_id,
                        campaign_ref
                    );
                }
                campaign.map(|c| c.id)
            }
            _ => None,
        };

        let new_lead = NewLead {
            organization_id,
            campaign_id,
            external_id: external_id.to_string(),
            name: name.to_string(),
            phone,
            email,
        };

        let lead = match self.store.insert_lead(new_lead).await {
            Ok(lead) => lead,
            Err(e) => match e.conflict() {
                Some(Constraint::LeadExternalId | Constraint::LeadOrganizationExternalId) => {
                    tracing::debug!("Lost insert race for lead {}; reading winner", external_id);
                    let winner = self
                        .store
                        .find_lead_by_external_id(external_id)
                        .await?
                        .ok_or_else(|| AppError::Conflict(format!("lead {}", external_id)))?;
                    return self.replayed_lead(organization_id, winner);
                }
                _ => return Err(e.into()),
            },
        };

        if let Some(campaign_id) = lead.campaign_id {
            // Drift from a failed increment is repaired by recompute.
            if let Err(e) = self
                .store
                .adjust_campaign_metrics(campaign_id, MetricsDelta::for_new_lead(lead.status), Utc::now())
                .await
            {
                tracing::error!(
                    "Failed to bump metrics of campaign {} for lead {}: {}",
                    campaign_id,
                    lead.id,
                    e
                );
            }
        }

        tracing::info!("Ingested lead {} ({})", lead.id, lead.external_id);
        emit(self.events.as_ref(), organization_id, EventKind::LeadIngested, &lead).await;

        Ok(LeadIngest {
            created: true,
            lead,
        })
    }

    fn replayed_lead(&self, organization_id: Uuid, existing: Lead) -> AppResult<LeadIngest> {
        if existing.organization_id != organization_id {
            tracing::warn!(
                "Lead {} already belongs to organization {}; rejected for {}",
                existing.external_id,
                existing.organization_id,
                organization_id
            );
            return Err(AppError::CrossTenantLead(existing.external_id));
        }
        Ok(LeadIngest {
            created: false,
            lead: existing,
        })
    }

    /// Ingests every payload independently; one bad record does not stop the rest.
    pub async fn ingest_leads(
        &self,
        organization_id: Uuid,
        payloads: Vec<LeadPayload>,
    ) -> AppResult<BatchReport> {
        self.check_batch(organization_id, payloads.len()).await?;

        let mut report = BatchReport::default();
        for payload in payloads {
            let external_id = payload.external_id.clone();
            let result = self
                .ingest_lead(organization_id, payload)
                .await
                .map(|outcome| outcome.created);
            report.record(&external_id, result);
        }

        self.store.touch_meta_sync(organization_id, Utc::now()).await?;
        Ok(report)
    }

    /// Insert-or-fetch keyed on `(organization, external_id)`. On an existing
    /// campaign only the platform-controlled status is synced.
    pub async fn ingest_campaign(
        &self,
        organization_id: Uuid,
        payload: CampaignPayload,
    ) -> AppResult<CampaignIngest> {
        let external_id = payload.external_id.trim();
        if external_id.is_empty() {
            return Err(AppError::Validation("external_id is required".to_string()));
        }
        let name = payload.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }

        if let Some(existing) = self
            .store
            .find_campaign_by_external_id(organization_id, external_id)
            .await?
        {
            return self.sync_existing_campaign(existing, payload.status).await;
        }

        let new_campaign = NewCampaign {
            organization_id,
            external_id: external_id.to_string(),
            external_ad_account_id: payload.external_ad_account_id.clone(),
            name: name.to_string(),
            description: payload.description.clone(),
            platform: payload.platform.unwrap_or_default(),
            status: payload.status.unwrap_or_default(),
        };

        let campaign = match self.store.insert_campaign(new_campaign).await {
            Ok(campaign) => campaign,
            Err(e) if e.conflict() == Some(Constraint::CampaignExternalId) => {
                tracing::debug!("Lost insert race for campaign {}; reading winner", external_id);
                let winner = self
                    .store
                    .find_campaign_by_external_id(organization_id, external_id)
                    .await?
                    .ok_or_else(|| AppError::Conflict(format!("campaign {}", external_id)))?;
                return self.sync_existing_campaign(winner, payload.status).await;
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!("Created campaign {} ({})", campaign.id, campaign.external_id);
        emit(self.events.as_ref(), organization_id, EventKind::CampaignUpdated, &campaign).await;

        Ok(CampaignIngest {
            created: true,
            campaign,
        })
    }

    async fn sync_existing_campaign(
        &self,
        existing: Campaign,
        status: Option<CampaignStatus>,
    ) -> AppResult<CampaignIngest> {
        let campaign = match status {
            Some(status) if status != existing.status => {
                let updated = self
                    .store
                    .set_campaign_status(existing.organization_id, existing.id, status)
                    .await?
                    .ok_or(AppError::CampaignNotFound)?;
                emit(
                    self.events.as_ref(),
                    updated.organization_id,
                    EventKind::CampaignUpdated,
                    &updated,
                )
                .await;
                updated
            }
            _ => existing,
        };

        Ok(CampaignIngest {
            created: false,
            campaign,
        })
    }

    pub async fn ingest_campaigns(
        &self,
        organization_id: Uuid,
        payloads: Vec<CampaignPayload>,
    ) -> AppResult<BatchReport> {
        self.check_batch(organization_id, payloads.len()).await?;

        let mut report = BatchReport::default();
        for payload in payloads {
            let external_id = payload.external_id.clone();
            let result = self
                .ingest_campaign(organization_id, payload)
                .await
                .map(|outcome| outcome.created);
            report.record(&external_id, result);
        }

        self.store.touch_meta_sync(organization_id, Utc::now()).await?;
        Ok(report)
    }

    async fn check_batch(&self, organization_id: Uuid, len: usize) -> AppResult<()> {
        let max = self.config.ingest.max_batch_size;
        if len > max {
            return Err(AppError::Validation(format!(
                "batch of {} exceeds the limit of {}",
                len, max
            )));
        }
        self.store
            .get_organization(organization_id)
            .await?
            .ok_or(AppError::OrganizationNotFound)?;
        Ok(())
    }

    /// Recounts the metrics block from the lead table and overwrites the cache.
    pub async fn recompute_campaign_metrics(
        &self,
        organization_id: Uuid,
        campaign_id: Uuid,
    ) -> AppResult<Campaign> {
        self.store
            .get_campaign(organization_id, campaign_id)
            .await?
            .ok_or(AppError::CampaignNotFound)?;

        let counts = self.store.campaign_status_counts(campaign_id).await?;
        let metrics = CampaignMetrics::from_status_counts(&counts, Utc::now());

        let campaign = self
            .store
            .replace_campaign_metrics(campaign_id, &metrics)
            .await?
            .ok_or(AppError::CampaignNotFound)?;

        tracing::debug!(
            "Recomputed campaign {}: total={} contacted={} converted={}",
            campaign.id,
            metrics.total_leads,
            metrics.contacted_leads,
            metrics.converted_leads
        );
        emit(self.events.as_ref(), organization_id, EventKind::CampaignUpdated, &campaign).await;

        Ok(campaign)
    }

    pub async fn recompute_organization_metrics(
        &self,
        organization_id: Uuid,
    ) -> AppResult<Vec<Campaign>> {
        let campaigns = self.store.list_campaigns(organization_id).await?;
        let mut recomputed = Vec::with_capacity(campaigns.len());
        for campaign in campaigns {
            recomputed.push(
                self.recompute_campaign_metrics(organization_id, campaign.id)
                    .await?,
            );
        }
        Ok(recomputed)
    }
}
