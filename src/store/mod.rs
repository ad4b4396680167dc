//! The Entity Store seam.
//!
//! Every cross-request coordination point lives here: inserts surface
//! unique-index violations as [`StoreError::Conflict`] so callers can fall
//! back to fetching the winner, and status writes are compare-and-set.
//! Nothing above this layer takes in-process locks, since several API
//! instances share one database.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Campaign, CampaignMetrics, CampaignStatus, Conversation, IntegrationsUpdate, Lead,
    LeadFilter, LeadStatus, Message, MessageFilter, MessageStatus, MetricsDelta, NewCampaign,
    NewConversation, NewLead, NewMessage, NewOrganization, NewUser, Organization,
    OrganizationSettings, ProjectionUpdate, StatusCount, User, UserCredentials,
};

pub mod postgres;

pub use postgres::PgStore;

/// Unique indexes the services rely on as race arbiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    LeadExternalId,
    LeadOrganizationExternalId,
    CampaignExternalId,
    ConversationLead,
    MessageExternalId,
    UserEmail,
}

impl Constraint {
    pub fn index_name(self) -> &'static str {
        match self {
            Self::LeadExternalId => "leads_external_id_key",
            Self::LeadOrganizationExternalId => "leads_org_external_id_key",
            Self::CampaignExternalId => "campaigns_org_external_id_key",
            Self::ConversationLead => "conversations_org_lead_key",
            Self::MessageExternalId => "messages_external_id_key",
            Self::UserEmail => "users_email_key",
        }
    }

    pub fn from_index_name(name: &str) -> Option<Self> {
        [
            Self::LeadExternalId,
            Self::LeadOrganizationExternalId,
            Self::CampaignExternalId,
            Self::ConversationLead,
            Self::MessageExternalId,
            Self::UserEmail,
        ]
        .into_iter()
        .find(|c| c.index_name() == name)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::LeadExternalId | Self::LeadOrganizationExternalId => "lead external id",
            Self::CampaignExternalId => "campaign external id",
            Self::ConversationLead => "conversation for lead",
            Self::MessageExternalId => "message external id",
            Self::UserEmail => "user email",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    Conflict(Constraint),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn conflict(&self) -> Option<Constraint> {
        match self {
            StoreError::Conflict(constraint) => Some(*constraint),
            StoreError::Database(_) => None,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait EntityStore: Send + Sync {
    // Organizations

    /// Creates the organization and its owning user in one unit.
    async fn create_organization(
        &self,
        organization: NewOrganization,
        owner: NewUser,
    ) -> StoreResult<(Organization, User)>;

    async fn get_organization(&self, id: Uuid) -> StoreResult<Option<Organization>>;

    async fn update_integrations(
        &self,
        id: Uuid,
        update: &IntegrationsUpdate,
    ) -> StoreResult<Option<Organization>>;

    async fn update_settings(
        &self,
        id: Uuid,
        settings: &OrganizationSettings,
    ) -> StoreResult<Option<Organization>>;

    async fn touch_meta_sync(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    // Users

    async fn insert_user(&self, user: NewUser) -> StoreResult<User>;

    /// Case-insensitive lookup.
    async fn find_user_credentials(&self, email: &str) -> StoreResult<Option<UserCredentials>>;

    async fn get_user(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<User>>;

    async fn list_users(&self, organization_id: Uuid) -> StoreResult<Vec<User>>;

    async fn update_user_name(
        &self,
        organization_id: Uuid,
        id: Uuid,
        name: &str,
    ) -> StoreResult<Option<User>>;

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    // Campaigns

    async fn insert_campaign(&self, campaign: NewCampaign) -> StoreResult<Campaign>;

    async fn find_campaign_by_external_id(
        &self,
        organization_id: Uuid,
        external_id: &str,
    ) -> StoreResult<Option<Campaign>>;

    async fn get_campaign(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<Campaign>>;

    async fn list_campaigns(&self, organization_id: Uuid) -> StoreResult<Vec<Campaign>>;

    async fn set_campaign_status(
        &self,
        organization_id: Uuid,
        id: Uuid,
        status: CampaignStatus,
    ) -> StoreResult<Option<Campaign>>;

    async fn set_campaign_template(
        &self,
        organization_id: Uuid,
        id: Uuid,
        template_name: Option<&str>,
    ) -> StoreResult<Option<Campaign>>;

    /// Deletes the campaign; its leads are detached, not removed.
    async fn delete_campaign(&self, organization_id: Uuid, id: Uuid) -> StoreResult<bool>;

    /// Atomic increment of the cached counters.
    async fn adjust_campaign_metrics(
        &self,
        id: Uuid,
        delta: MetricsDelta,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn replace_campaign_metrics(
        &self,
        id: Uuid,
        metrics: &CampaignMetrics,
    ) -> StoreResult<Option<Campaign>>;

    /// Lead counts per status for one campaign, read straight from the lead table.
    async fn campaign_status_counts(&self, campaign_id: Uuid) -> StoreResult<Vec<StatusCount>>;

    // Leads

    async fn insert_lead(&self, lead: NewLead) -> StoreResult<Lead>;

    /// Lookup by the globally unique external id, across organizations.
    async fn find_lead_by_external_id(&self, external_id: &str) -> StoreResult<Option<Lead>>;

    async fn get_lead(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<Lead>>;

    async fn query_leads(&self, organization_id: Uuid, filter: &LeadFilter) -> StoreResult<Vec<Lead>>;

    async fn lead_status_counts(&self, organization_id: Uuid) -> StoreResult<Vec<StatusCount>>;

    /// Sets `next` only if the lead is still in `expected`. `None` when the
    /// lead moved on in the meantime (or does not exist).
    async fn compare_and_set_lead_status(
        &self,
        id: Uuid,
        expected: LeadStatus,
        next: LeadStatus,
    ) -> StoreResult<Option<Lead>>;

    async fn set_lead_note(
        &self,
        organization_id: Uuid,
        id: Uuid,
        note: Option<&str>,
    ) -> StoreResult<Option<Lead>>;

    // Conversations

    async fn insert_conversation(&self, conversation: NewConversation) -> StoreResult<Conversation>;

    async fn find_conversation_by_lead(
        &self,
        organization_id: Uuid,
        lead_id: Uuid,
    ) -> StoreResult<Option<Conversation>>;

    async fn get_conversation(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<Conversation>>;

    /// Newest activity first.
    async fn list_conversations(
        &self,
        organization_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Conversation>>;

    /// Applies [`Conversation::apply_projection`] atomically, recounting
    /// `unread_count` from the stored messages. Safe to repeat.
    async fn advance_conversation(
        &self,
        id: Uuid,
        update: &ProjectionUpdate,
    ) -> StoreResult<Conversation>;

    /// Zeroes `unread_count` and moves the read marker to now.
    async fn reset_unread(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<Conversation>>;

    // Messages

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message>;

    async fn find_message_by_external_id(&self, external_id: &str) -> StoreResult<Option<Message>>;

    /// Newest message of the conversation by `created_at`.
    async fn latest_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>>;

    /// Oldest first.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        filter: &MessageFilter,
    ) -> StoreResult<Vec<Message>>;

    async fn compare_and_set_message_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
    ) -> StoreResult<Option<Message>>;
}
