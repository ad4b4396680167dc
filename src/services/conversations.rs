//! Conversation synchronizer: the append-only message log per lead and the
//! cached sidebar projection on its conversation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{
        Conversation, ConversationWithLead, LeadFilter, LeadSummary, MediaMetadata, Message,
        MessageDirection, MessageFilter, MessageStatus, MessageType, NewConversation, NewMessage,
        ProjectionUpdate, StatusTransition,
    },
    services::{
        events::{emit, EventKind, EventPublisher},
        leads::{LeadService, MAX_CAS_ATTEMPTS},
        phone::normalize_phone,
    },
    store::{Constraint, EntityStore},
};

/// Leads sharing one phone number whose histories are merged.
const MAX_LEADS_PER_PHONE: i64 = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct AppendMessage {
    pub lead_id: Uuid,
    pub direction: MessageDirection,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub metadata: MediaMetadata,
    /// Platform timestamp; defaults to receipt time.
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppendOutcome {
    pub created: bool,
    pub message: Message,
    pub conversation: Conversation,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusOutcome {
    pub changed: bool,
    pub message: Message,
}

pub struct ConversationService {
    store: Arc<dyn EntityStore>,
    events: Arc<dyn EventPublisher>,
    config: Arc<Config>,
}

impl ConversationService {
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

    /// Appends a message to the lead's conversation, creating the
    /// conversation on first use. A repeated `external_id` is a no-op that
    /// returns the stored message.
    pub async fn append_message(
        &self,
        organization_id: Uuid,
        input: AppendMessage,
    ) -> AppResult<AppendOutcome> {
        if input.message_type == MessageType::Text && input.content.trim().is_empty() {
            return Err(AppError::Validation(
                "content is required for text messages".to_string(),
            ));
        }
        let external_id = input
            .external_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        if let Some(external_id) = &external_id {
            if let Some(existing) = self.store.find_message_by_external_id(external_id).await? {
                return self.replayed_message(organization_id, existing).await;
            }
        }

        let lead = self
            .store
            .get_lead(organization_id, input.lead_id)
            .await?
            .ok_or(AppError::LeadNotFound)?;

        let conversation = self
            .find_or_create_conversation(organization_id, lead.id)
            .await?;

        let new_message = NewMessage {
            conversation_id: conversation.id,
            lead_id: lead.id,
            organization_id,
            content: input.content,
            message_type: input.message_type,
            direction: input.direction,
            status: MessageStatus::initial(input.direction),
            external_id: external_id.clone(),
            metadata: input.metadata,
            created_at: input.occurred_at.unwrap_or_else(Utc::now),
        };

        let message = match self.store.insert_message(new_message).await {
            Ok(message) => message,
            Err(e) if e.conflict() == Some(Constraint::MessageExternalId) => {
                let external_id = external_id.unwrap_or_default();
                tracing::debug!("Lost insert race for message {}; reading winner", external_id);
                let winner = self
                    .store
                    .find_message_by_external_id(&external_id)
                    .await?
                    .ok_or_else(|| AppError::Conflict(format!("message {}", external_id)))?;
                return self.replayed_message(organization_id, winner).await;
            }
            Err(e) => return Err(e.into()),
        };

        let conversation = self
            .store
            .advance_conversation(conversation.id, &ProjectionUpdate::from_message(&message))
            .await?;

        LeadService::new(self.store.clone(), self.events.clone())
            .advance_for_message(lead, message.direction)
            .await?;

        let outcome = AppendOutcome {
            created: true,
            message,
            conversation,
        };
        emit(
            self.events.as_ref(),
            organization_id,
            EventKind::MessageAppended,
            &outcome,
        )
        .await;

        Ok(outcome)
    }

    async fn replayed_message(
        &self,
        organization_id: Uuid,
        existing: Message,
    ) -> AppResult<AppendOutcome> {
        if existing.organization_id != organization_id {
            tracing::warn!(
                "Message {:?} belongs to organization {}; rejected for {}",
                existing.external_id,
                existing.organization_id,
                organization_id
            );
            return Err(AppError::Conflict(
                "message id belongs to another organization".to_string(),
            ));
        }
        tracing::debug!("Duplicate message delivery absorbed: {:?}", existing.external_id);

        // The first delivery may have stopped after storing the message.
        // Both follow-up steps are forward-only, so repeating them is safe.
        let conversation = self
            .store
            .advance_conversation(
                existing.conversation_id,
                &ProjectionUpdate::from_message(&existing),
            )
            .await?;

        if let Some(lead) = self.store.get_lead(organization_id, existing.lead_id).await? {
            LeadService::new(self.store.clone(), self.events.clone())
                .advance_for_message(lead, existing.direction)
                .await?;
        }

        Ok(AppendOutcome {
            created: false,
            message: existing,
            conversation,
        })
    }

    /// Rebuilds the cached projection from the message log: the head from
    /// the newest message, `unread_count` from the inbound messages after the
    /// read marker.
    pub async fn recompute_conversation_projection(
        &self,
        organization_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<Conversation> {
        let conversation = self
            .store
            .get_conversation(organization_id, conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound)?;

        let Some(newest) = self.store.latest_message(conversation.id).await? else {
            return Ok(conversation);
        };

        let conversation = self
            .store
            .advance_conversation(conversation.id, &ProjectionUpdate::from_message(&newest))
            .await?;

        tracing::debug!(
            "Recomputed conversation {}: unread={}",
            conversation.id,
            conversation.unread_count
        );
        Ok(conversation)
    }

    /// One conversation per (organization, lead); the unique index settles
    /// concurrent first messages.
    pub async fn find_or_create_conversation(
        &self,
        organization_id: Uuid,
        lead_id: Uuid,
    ) -> AppResult<Conversation> {
        if let Some(conversation) = self
            .store
            .find_conversation_by_lead(organization_id, lead_id)
            .await?
        {
            return Ok(conversation);
        }

        let new_conversation = NewConversation {
            organization_id,
            lead_id,
            platform: Default::default(),
            external_thread_id: None,
        };

        match self.store.insert_conversation(new_conversation).await {
            Ok(conversation) => {
                tracing::info!("Opened conversation {} for lead {}", conversation.id, lead_id);
                Ok(conversation)
            }
            Err(e) if e.conflict() == Some(Constraint::ConversationLead) => {
                tracing::debug!("Lost insert race for conversation of lead {}", lead_id);
                self.store
                    .find_conversation_by_lead(organization_id, lead_id)
                    .await?
                    .ok_or(AppError::ConversationNotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Applies a delivery receipt. Backward or repeated receipts leave the
    /// message as it is.
    pub async fn update_message_status(
        &self,
        organization_id: Uuid,
        external_id: &str,
        next: MessageStatus,
    ) -> AppResult<StatusOutcome> {
        let mut message = self.message_by_external_id(organization_id, external_id).await?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let target = match message.status.transition(next) {
                StatusTransition::Advance(target) => target,
                StatusTransition::Unchanged => {
                    return Ok(StatusOutcome {
                        changed: false,
                        message,
                    })
                }
                StatusTransition::Rejected => {
                    tracing::debug!(
                        "Ignoring receipt {:?} -> {:?} for message {}",
                        message.status,
                        next,
                        external_id
                    );
                    return Ok(StatusOutcome {
                        changed: false,
                        message,
                    });
                }
            };

            match self
                .store
                .compare_and_set_message_status(message.id, message.status, target)
                .await?
            {
                Some(updated) => {
                    emit(
                        self.events.as_ref(),
                        organization_id,
                        EventKind::MessageStatus,
                        &updated,
                    )
                    .await;
                    return Ok(StatusOutcome {
                        changed: true,
                        message: updated,
                    });
                }
                None => {
                    message = self.message_by_external_id(organization_id, external_id).await?;
                }
            }
        }

        Err(AppError::Conflict(format!(
            "message {} is being updated concurrently",
            external_id
        )))
    }

    async fn message_by_external_id(
        &self,
        organization_id: Uuid,
        external_id: &str,
    ) -> AppResult<Message> {
        self.store
            .find_message_by_external_id(external_id)
            .await?
            .filter(|m| m.organization_id == organization_id)
            .ok_or(AppError::MessageNotFound)
    }

    pub async fn mark_conversation_read(
        &self,
        organization_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<Conversation> {
        let conversation = self
            .store
            .reset_unread(organization_id, conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound)?;

        emit(
            self.events.as_ref(),
            organization_id,
            EventKind::ConversationRead,
            &conversation,
        )
        .await;

        Ok(conversation)
    }

    pub async fn list_conversations(
        &self,
        organization_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<ConversationWithLead>> {
        let conversations = self
            .store
            .list_conversations(organization_id, limit, offset)
            .await?;

        let mut result = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            result.push(self.with_lead(conversation).await?);
        }
        Ok(result)
    }

    pub async fn get_conversation(
        &self,
        organization_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<ConversationWithLead> {
        let conversation = self
            .store
            .get_conversation(organization_id, conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound)?;
        self.with_lead(conversation).await
    }

    async fn with_lead(&self, conversation: Conversation) -> AppResult<ConversationWithLead> {
        let lead = self
            .store
            .get_lead(conversation.organization_id, conversation.lead_id)
            .await?;
        Ok(ConversationWithLead {
            lead: lead.as_ref().map(LeadSummary::from),
            conversation,
        })
    }

    /// Oldest first; `filter.after` supports polling for new messages.
    pub async fn list_messages(
        &self,
        organization_id: Uuid,
        conversation_id: Uuid,
        filter: &MessageFilter,
    ) -> AppResult<Vec<Message>> {
        self.store
            .get_conversation(organization_id, conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound)?;

        Ok(self.store.list_messages(conversation_id, filter).await?)
    }

    /// Message history of every lead with this phone number, merged in order.
    pub async fn messages_for_phone(
        &self,
        organization_id: Uuid,
        raw_phone: &str,
        filter: &MessageFilter,
    ) -> AppResult<Vec<Message>> {
        let phone = normalize_phone(raw_phone, &self.config.ingest.default_country_code)
            .ok_or_else(|| AppError::Validation("phone is required".to_string()))?;

        let leads = self
            .store
            .query_leads(
                organization_id,
                &LeadFilter {
                    phone: Some(phone),
                    limit: MAX_LEADS_PER_PHONE,
                    ..Default::default()
                },
            )
            .await?;

        let mut messages = Vec::new();
        for lead in leads {
            if let Some(conversation) = self
                .store
                .find_conversation_by_lead(organization_id, lead.id)
                .await?
            {
                messages.extend(self.store.list_messages(conversation.id, filter).await?);
            }
        }

        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if filter.limit > 0 {
            messages.truncate(filter.limit as usize);
        }
        Ok(messages)
    }
}
