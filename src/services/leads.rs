use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Lead, LeadFilter, LeadStatus, MessageDirection, MetricsDelta, StatusCount},
    services::events::{emit, EventKind, EventPublisher},
    store::EntityStore,
};

/// Bound on compare-and-set retries against concurrent writers.
pub const MAX_CAS_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadUpdate {
    pub status: Option<LeadStatus>,
    /// An empty note clears it.
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeadStats {
    pub total: i64,
    pub by_status: Vec<StatusCount>,
}

impl LeadStats {
    /// Every status is present, zero-filled, in pipeline order.
    pub fn from_counts(counts: &[StatusCount]) -> Self {
        let by_status: Vec<StatusCount> = LeadStatus::ALL
            .into_iter()
            .map(|status| StatusCount {
                status,
                count: counts
                    .iter()
                    .filter(|c| c.status == status)
                    .map(|c| c.count)
                    .sum(),
            })
            .collect();
        let total = by_status.iter().map(|c| c.count).sum();
        Self { total, by_status }
    }
}

pub struct LeadService {
    store: Arc<dyn EntityStore>,
    events: Arc<dyn EventPublisher>,
}

impl LeadService {
    pub fn new(store: Arc<dyn EntityStore>, events: Arc<dyn EventPublisher>) -> Self {
        Self { store, events }
    }

    pub async fn list(&self, organization_id: Uuid, filter: &LeadFilter) -> AppResult<Vec<Lead>> {
        Ok(self.store.query_leads(organization_id, filter).await?)
    }

    pub async fn get(&self, organization_id: Uuid, lead_id: Uuid) -> AppResult<Lead> {
        self.store
            .get_lead(organization_id, lead_id)
            .await?
            .ok_or(AppError::LeadNotFound)
    }

    pub async fn stats(&self, organization_id: Uuid) -> AppResult<LeadStats> {
        let counts = self.store.lead_status_counts(organization_id).await?;
        Ok(LeadStats::from_counts(&counts))
    }

    /// Staff edit. Status may move to any value; the campaign counters
    /// follow the change.
    pub async fn update_lead(
        &self,
        organization_id: Uuid,
        lead_id: Uuid,
        update: LeadUpdate,
    ) -> AppResult<Lead> {
        if update.status.is_none() && update.note.is_none() {
            return Err(AppError::BadRequest("No fields to update".to_string()));
        }

        let mut lead = self.get(organization_id, lead_id).await?;

        if let Some(note) = &update.note {
            let note = Some(note.trim()).filter(|n| !n.is_empty());
            lead = self
                .store
                .set_lead_note(organization_id, lead_id, note)
                .await?
                .ok_or(AppError::LeadNotFound)?;
        }

        if let Some(target) = update.status {
            lead = self.move_to(lead, |_| Some(target)).await?;
        }

        emit(self.events.as_ref(), organization_id, EventKind::LeadUpdated, &lead).await;
        Ok(lead)
    }

    /// Advances the pipeline after a message: outbound marks a new lead
    /// contacted, inbound marks it responded. Returns the lead only if it moved.
    pub async fn advance_for_message(
        &self,
        lead: Lead,
        direction: MessageDirection,
    ) -> AppResult<Option<Lead>> {
        if lead.status.after_message(direction).is_none() {
            return Ok(None);
        }

        let before = lead.status;
        let lead = self
            .move_to(lead, |current| current.after_message(direction))
            .await?;

        if lead.status == before {
            return Ok(None);
        }
        emit(self.events.as_ref(), lead.organization_id, EventKind::LeadUpdated, &lead).await;
        Ok(Some(lead))
    }

    /// Compare-and-set loop. `next` is re-evaluated against the freshest
    /// status on every attempt; `None` means stay put.
    async fn move_to<F>(&self, mut lead: Lead, next: F) -> AppResult<Lead>
    where
        F: Fn(LeadStatus) -> Option<LeadStatus> + Send + Sync,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let target = match next(lead.status) {
                Some(target) if target != lead.status => target,
                _ => return Ok(lead),
            };

            match self
                .store
                .compare_and_set_lead_status(lead.id, lead.status, target)
                .await?
            {
                Some(updated) => {
                    self.apply_metrics(&lead, target).await;
                    return Ok(updated);
                }
                None => {
                    tracing::debug!("Lead {} changed under us; retrying", lead.id);
                    lead = self
                        .store
                        .get_lead(lead.organization_id, lead.id)
                        .await?
                        .ok_or(AppError::LeadNotFound)?;
                }
            }
        }

        Err(AppError::Conflict(format!(
            "lead {} is being updated concurrently",
            lead.id
        )))
    }

    async fn apply_metrics(&self, before: &Lead, to: LeadStatus) {
        let Some(campaign_id) = before.campaign_id else {
            return;
        };
        let delta = MetricsDelta::between(before.status, to);
        if delta.is_zero() {
            return;
        }
        if let Err(e) = self
            .store
            .adjust_campaign_metrics(campaign_id, delta, Utc::now())
            .await
        {
            tracing::error!(
                "Failed to adjust metrics of campaign {} for lead {}: {}",
                campaign_id,
                before.id,
                e
            );
        }
    }
}
