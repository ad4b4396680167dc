use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "message.appended")]
    MessageAppended,
    #[serde(rename = "message.status")]
    MessageStatus,
    #[serde(rename = "conversation.read")]
    ConversationRead,
    #[serde(rename = "lead.ingested")]
    LeadIngested,
    #[serde(rename = "lead.updated")]
    LeadUpdated,
    #[serde(rename = "campaign.updated")]
    CampaignUpdated,
    #[serde(rename = "campaign.deleted")]
    CampaignDeleted,
}

/// What dashboard clients receive over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub organization_id: Uuid,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DashboardEvent) -> AppResult<()>;
}

/// Publishes after a committed mutation. Failures are logged and dropped:
/// the mutation already happened and clients can always poll.
pub async fn emit<T: Serialize>(
    publisher: &dyn EventPublisher,
    organization_id: Uuid,
    kind: EventKind,
    payload: &T,
) {
    let payload = match serde_json::to_value(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Failed to encode {:?} event: {}", kind, e);
            return;
        }
    };

    let event = DashboardEvent {
        kind,
        organization_id,
        payload,
    };

    if let Err(e) = publisher.publish(&event).await {
        tracing::warn!(
            "Failed to publish {:?} event for organization {}: {}",
            kind,
            organization_id,
            e
        );
    }
}
