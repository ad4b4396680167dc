use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Longest sidebar preview, in characters.
pub const PREVIEW_MAX_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub lead_id: Uuid,
    pub organization_id: Uuid,
    pub content: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub message_type: MessageType,
    pub direction: MessageDirection,
    pub status: MessageStatus,
    pub external_id: Option<String>,
    #[sqlx(flatten)]
    pub metadata: MediaMetadata,
    /// Platform time when supplied, otherwise receipt time.
    pub created_at: DateTime<Utc>,
    /// When the message was stored here.
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MediaMetadata {
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub caption: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Document,
    Audio,
    Template,
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_direction", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
}

/// Outcome of applying a delivery receipt to the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    Advance(MessageStatus),
    Unchanged,
    Rejected,
}

impl MessageStatus {
    /// Inbound messages are stored as already delivered: receipt implies delivery.
    pub fn initial(direction: MessageDirection) -> Self {
        match direction {
            MessageDirection::Outbound => Self::Queued,
            MessageDirection::Inbound => Self::Delivered,
        }
    }

    fn rank(self) -> Option<u8> {
        match self {
            Self::Queued => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Read | Self::Failed)
    }

    /// queued → sent → delivered → read, steps may be skipped; failed is
    /// reachable from any non-terminal state. Nothing moves backward.
    pub fn transition(self, next: MessageStatus) -> StatusTransition {
        if self == next {
            return StatusTransition::Unchanged;
        }
        if self.is_terminal() {
            return StatusTransition::Rejected;
        }
        match (self.rank(), next.rank()) {
            (_, None) => StatusTransition::Advance(next),
            (Some(current), Some(target)) if target > current => StatusTransition::Advance(next),
            _ => StatusTransition::Rejected,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub lead_id: Uuid,
    pub organization_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub direction: MessageDirection,
    pub status: MessageStatus,
    pub external_id: Option<String>,
    pub metadata: MediaMetadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub after: Option<DateTime<Utc>>,
    pub limit: i64,
}

/// Sidebar text for a message: the text itself for text messages, a short
/// label for everything else.
pub fn preview(message_type: MessageType, content: &str, metadata: &MediaMetadata) -> String {
    let detail = metadata
        .caption
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or(content)
        .trim();

    let text = match message_type {
        MessageType::Text => content.trim().to_string(),
        MessageType::Template => format!("Template: {}", content.trim()),
        MessageType::Document => match metadata.file_name.as_deref() {
            Some(name) if !name.is_empty() => format!("Document: {}", name),
            _ => labelled("Document", detail),
        },
        MessageType::Image => labelled("Photo", detail),
        MessageType::Video => labelled("Video", detail),
        MessageType::Audio => "Audio".to_string(),
    };

    truncate(&text, PREVIEW_MAX_CHARS)
}

fn labelled(label: &str, detail: &str) -> String {
    if detail.is_empty() {
        label.to_string()
    } else {
        format!("{}: {}", label, detail)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}…", text[..cut].trim_end()),
    }
}
