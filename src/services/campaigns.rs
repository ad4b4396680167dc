use std::sync::Arc;

use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Campaign, CampaignStatus},
    services::events::{emit, EventKind, EventPublisher},
    store::EntityStore,
};

/// Staff-side campaign management. Creation and metric reconciliation go
/// through the ingestion service.
pub struct CampaignService {
    store: Arc<dyn EntityStore>,
    events: Arc<dyn EventPublisher>,
}

impl CampaignService {
    pub fn new(store: Arc<dyn EntityStore>, events: Arc<dyn EventPublisher>) -> Self {
        Self { store, events }
    }

    pub async fn list(&self, organization_id: Uuid) -> AppResult<Vec<Campaign>> {
        Ok(self.store.list_campaigns(organization_id).await?)
    }

    pub async fn get(&self, organization_id: Uuid, campaign_id: Uuid) -> AppResult<Campaign> {
        self.store
            .get_campaign(organization_id, campaign_id)
            .await?
            .ok_or(AppError::CampaignNotFound)
    }

    pub async fn set_status(
        &self,
        organization_id: Uuid,
        campaign_id: Uuid,
        status: CampaignStatus,
    ) -> AppResult<Campaign> {
        let campaign = self
            .store
            .set_campaign_status(organization_id, campaign_id, status)
            .await?
            .ok_or(AppError::CampaignNotFound)?;
        emit(self.events.as_ref(), organization_id, EventKind::CampaignUpdated, &campaign).await;
        Ok(campaign)
    }

    /// Selects the WhatsApp template used for the campaign, or clears it.
    pub async fn set_template(
        &self,
        organization_id: Uuid,
        campaign_id: Uuid,
        template_name: Option<&str>,
    ) -> AppResult<Campaign> {
        let template_name = template_name.map(str::trim).filter(|t| !t.is_empty());
        let campaign = self
            .store
            .set_campaign_template(organization_id, campaign_id, template_name)
            .await?
            .ok_or(AppError::CampaignNotFound)?;
        emit(self.events.as_ref(), organization_id, EventKind::CampaignUpdated, &campaign).await;
        Ok(campaign)
    }

    /// Leads of the campaign stay, detached.
    pub async fn delete(&self, organization_id: Uuid, campaign_id: Uuid) -> AppResult<()> {
        if !self.store.delete_campaign(organization_id, campaign_id).await? {
            return Err(AppError::CampaignNotFound);
        }
        tracing::info!("Deleted campaign {}", campaign_id);
        emit(
            self.events.as_ref(),
            organization_id,
            EventKind::CampaignDeleted,
            &serde_json::json!({ "id": campaign_id }),
        )
        .await;
        Ok(())
    }
}
