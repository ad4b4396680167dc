use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{preview, LeadSummary, Message, MessageDirection};

/// The messaging thread between an organization and one of its leads.
/// `(organization_id, lead_id)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub lead_id: Uuid,
    pub last_message: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
    /// Set when staff open the thread; inbound messages after it are unread.
    pub last_read_at: Option<DateTime<Utc>>,
    pub platform: ConversationPlatform,
    pub external_thread_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "conversation_platform", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversationPlatform {
    Whatsapp,
    Sms,
    Email,
}

impl Default for ConversationPlatform {
    fn default() -> Self {
        Self::Whatsapp
    }
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub organization_id: Uuid,
    pub lead_id: Uuid,
    pub platform: ConversationPlatform,
    pub external_thread_id: Option<String>,
}

/// Candidate head of the cached projection, taken from one message.
#[derive(Debug, Clone)]
pub struct ProjectionUpdate {
    pub preview: String,
    pub message_at: DateTime<Utc>,
}

impl ProjectionUpdate {
    pub fn from_message(message: &Message) -> Self {
        Self {
            preview: preview(message.message_type, &message.content, &message.metadata),
            message_at: message.created_at,
        }
    }
}

impl Conversation {
    /// Inbound and received after the read marker.
    pub fn counts_as_unread(&self, message: &Message) -> bool {
        message.direction == MessageDirection::Inbound
            && self.last_read_at.map_or(true, |read| message.received_at > read)
    }

    /// Folds a message into the projection.
    ///
    /// `last_message`/`last_message_at` only move forward in time: a delayed
    /// message older than the current head leaves them untouched, and on
    /// equal timestamps the later fold wins. `unread_count` is recounted from
    /// `log`, the conversation's messages, so folding the same message twice
    /// changes nothing.
    pub fn apply_projection<'a>(
        &mut self,
        update: &ProjectionUpdate,
        log: impl IntoIterator<Item = &'a Message>,
    ) {
        let advances = match self.last_message_at {
            None => true,
            Some(current) => update.message_at >= current,
        };
        if advances {
            self.last_message = update.preview.clone();
            self.last_message_at = Some(update.message_at);
        }
        self.unread_count = log
            .into_iter()
            .filter(|message| message.conversation_id == self.id && self.counts_as_unread(message))
            .count() as i64;
    }

    /// Sort key for the sidebar: newest activity first.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationWithLead {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub lead: Option<LeadSummary>,
}
