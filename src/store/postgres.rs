use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{Constraint, EntityStore, StoreError, StoreResult};
use crate::models::{
    Campaign, CampaignMetrics, CampaignStatus, Conversation, IntegrationsUpdate, Lead,
    LeadFilter, LeadStatus, Message, MessageFilter, MessageStatus, MetricsDelta, NewCampaign,
    NewConversation, NewLead, NewMessage, NewOrganization, NewUser, Organization,
    OrganizationSettings, ProjectionUpdate, StatusCount, User, UserCredentials,
};

/// PostgreSQL-backed entity store. The unique indexes created by the
/// migrations are what arbitrate concurrent inserts.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Maps unique violations on known indexes to [`StoreError::Conflict`].
fn map_insert_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            if let Some(constraint) = db_err.constraint().and_then(Constraint::from_index_name) {
                return StoreError::Conflict(constraint);
            }
        }
    }
    StoreError::Database(err)
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl EntityStore for PgStore {
    async fn create_organization(
        &self,
        organization: NewOrganization,
        owner: NewUser,
    ) -> StoreResult<(Organization, User)> {
        let mut tx = self.db.begin().await?;

        sqlx::query("INSERT INTO organizations (id, name) VALUES ($1, $2)")
            .bind(organization.id)
            .bind(&organization.name)
            .execute(&mut *tx)
            .await?;

        let user: User = sqlx::query_as(
            r#"
            INSERT INTO users (id, organization_id, name, email, password_hash, role)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(organization.id)
        .bind(&owner.name)
        .bind(&owner.email)
        .bind(&owner.password_hash)
        .bind(owner.role)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_insert_error)?;

        let organization: Organization = sqlx::query_as(
            "UPDATE organizations SET owner_id = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(organization.id)
        .bind(user.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((organization, user))
    }

    async fn get_organization(&self, id: Uuid) -> StoreResult<Option<Organization>> {
        let organization = sqlx::query_as("SELECT * FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(organization)
    }

    async fn update_integrations(
        &self,
        id: Uuid,
        update: &IntegrationsUpdate,
    ) -> StoreResult<Option<Organization>> {
        let organization = sqlx::query_as(
            r#"
            UPDATE organizations SET
                meta_page_id = COALESCE($2, meta_page_id),
                meta_is_valid = CASE
                    WHEN $3::text IS NOT NULL AND meta_access_token IS DISTINCT FROM $3 THEN FALSE
                    ELSE meta_is_valid END,
                meta_access_token = COALESCE($3, meta_access_token),
                wati_is_valid = CASE
                    WHEN $4::text IS NOT NULL AND wati_api_token IS DISTINCT FROM $4 THEN FALSE
                    ELSE wati_is_valid END,
                wati_api_token = COALESCE($4, wati_api_token),
                wati_base_url = COALESCE($5, wati_base_url),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&update.meta_page_id)
        .bind(&update.meta_access_token)
        .bind(&update.wati_api_token)
        .bind(&update.wati_base_url)
        .fetch_optional(&self.db)
        .await?;
        Ok(organization)
    }

    async fn update_settings(
        &self,
        id: Uuid,
        settings: &OrganizationSettings,
    ) -> StoreResult<Option<Organization>> {
        let organization = sqlx::query_as(
            r#"
            UPDATE organizations SET timezone = $2, currency = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&settings.timezone)
        .bind(&settings.currency)
        .fetch_optional(&self.db)
        .await?;
        Ok(organization)
    }

    async fn touch_meta_sync(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE organizations SET meta_last_sync = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        sqlx::query_as(
            r#"
            INSERT INTO users (id, organization_id, name, email, password_hash, role)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.organization_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .fetch_one(&self.db)
        .await
        .map_err(map_insert_error)
    }

    async fn find_user_credentials(&self, email: &str) -> StoreResult<Option<UserCredentials>> {
        let credentials = sqlx::query_as("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(credentials)
    }

    async fn get_user(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as("SELECT * FROM users WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn list_users(&self, organization_id: Uuid) -> StoreResult<Vec<User>> {
        let users = sqlx::query_as(
            "SELECT * FROM users WHERE organization_id = $1 ORDER BY created_at ASC",
        )
        .bind(organization_id)
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn update_user_name(
        &self,
        organization_id: Uuid,
        id: Uuid,
        name: &str,
    ) -> StoreResult<Option<User>> {
        let user = sqlx::query_as(
            r#"
            UPDATE users SET name = $3, updated_at = NOW()
            WHERE id = $1 AND organization_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(name)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_campaign(&self, campaign: NewCampaign) -> StoreResult<Campaign> {
        sqlx::query_as(
            r#"
            INSERT INTO campaigns
                (id, organization_id, external_id, external_ad_account_id, name, description, platform, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(campaign.organization_id)
        .bind(&campaign.external_id)
        .bind(&campaign.external_ad_account_id)
        .bind(&campaign.name)
        .bind(&campaign.description)
        .bind(campaign.platform)
        .bind(campaign.status)
        .fetch_one(&self.db)
        .await
        .map_err(map_insert_error)
    }

    async fn find_campaign_by_external_id(
        &self,
        organization_id: Uuid,
        external_id: &str,
    ) -> StoreResult<Option<Campaign>> {
        let campaign = sqlx::query_as(
            "SELECT * FROM campaigns WHERE organization_id = $1 AND external_id = $2",
        )
        .bind(organization_id)
        .bind(external_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(campaign)
    }

    async fn get_campaign(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<Campaign>> {
        let campaign =
            sqlx::query_as("SELECT * FROM campaigns WHERE id = $1 AND organization_id = $2")
                .bind(id)
                .bind(organization_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(campaign)
    }

    async fn list_campaigns(&self, organization_id: Uuid) -> StoreResult<Vec<Campaign>> {
        let campaigns = sqlx::query_as(
            "SELECT * FROM campaigns WHERE organization_id = $1 ORDER BY created_at DESC",
        )
        .bind(organization_id)
        .fetch_all(&self.db)
        .await?;
        Ok(campaigns)
    }

    async fn set_campaign_status(
        &self,
        organization_id: Uuid,
        id: Uuid,
        status: CampaignStatus,
    ) -> StoreResult<Option<Campaign>> {
        let campaign = sqlx::query_as(
            r#"
            UPDATE campaigns SET status = $3, updated_at = NOW()
            WHERE id = $1 AND organization_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(status)
        .fetch_optional(&self.db)
        .await?;
        Ok(campaign)
    }

    async fn set_campaign_template(
        &self,
        organization_id: Uuid,
        id: Uuid,
        template_name: Option<&str>,
    ) -> StoreResult<Option<Campaign>> {
        let campaign = sqlx::query_as(
            r#"
            UPDATE campaigns SET template_name = $3, updated_at = NOW()
            WHERE id = $1 AND organization_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(template_name)
        .fetch_optional(&self.db)
        .await?;
        Ok(campaign)
    }

    async fn delete_campaign(&self, organization_id: Uuid, id: Uuid) -> StoreResult<bool> {
        // leads.campaign_id is ON DELETE SET NULL
        let result = sqlx::query("DELETE FROM campaigns WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn adjust_campaign_metrics(
        &self,
        id: Uuid,
        delta: MetricsDelta,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                total_leads = total_leads + $2,
                contacted_leads = contacted_leads + $3,
                converted_leads = converted_leads + $4,
                last_updated = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(delta.total)
        .bind(delta.contacted)
        .bind(delta.converted)
        .bind(at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn replace_campaign_metrics(
        &self,
        id: Uuid,
        metrics: &CampaignMetrics,
    ) -> StoreResult<Option<Campaign>> {
        let campaign = sqlx::query_as(
            r#"
            UPDATE campaigns SET
                total_leads = $2,
                contacted_leads = $3,
                converted_leads = $4,
                last_updated = $5
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(metrics.total_leads)
        .bind(metrics.contacted_leads)
        .bind(metrics.converted_leads)
        .bind(metrics.last_updated)
        .fetch_optional(&self.db)
        .await?;
        Ok(campaign)
    }

    async fn campaign_status_counts(&self, campaign_id: Uuid) -> StoreResult<Vec<StatusCount>> {
        let counts = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) AS count FROM leads
            WHERE campaign_id = $1
            GROUP BY status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.db)
        .await?;
        Ok(counts)
    }

    async fn insert_lead(&self, lead: NewLead) -> StoreResult<Lead> {
        sqlx::query_as(
            r#"
            INSERT INTO leads (id, organization_id, campaign_id, external_id, name, phone, email, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(lead.organization_id)
        .bind(lead.campaign_id)
        .bind(&lead.external_id)
        .bind(&lead.name)
        .bind(&lead.phone)
        .bind(&lead.email)
        .bind(LeadStatus::New)
        .fetch_one(&self.db)
        .await
        .map_err(map_insert_error)
    }

    async fn find_lead_by_external_id(&self, external_id: &str) -> StoreResult<Option<Lead>> {
        let lead = sqlx::query_as("SELECT * FROM leads WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(lead)
    }

    async fn get_lead(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<Lead>> {
        let lead = sqlx::query_as("SELECT * FROM leads WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(lead)
    }

    async fn query_leads(&self, organization_id: Uuid, filter: &LeadFilter) -> StoreResult<Vec<Lead>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM leads WHERE organization_id = ");
        query.push_bind(organization_id);

        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status);
        }
        if let Some(campaign_id) = filter.campaign_id {
            query.push(" AND campaign_id = ").push_bind(campaign_id);
        }
        if let Some(from) = filter.created_from {
            query.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.created_to {
            query.push(" AND created_at < ").push_bind(to);
        }
        if let Some(phone) = &filter.phone {
            query.push(" AND phone = ").push_bind(phone.clone());
        }
        if let Some(term) = &filter.search {
            let pattern = like_pattern(term);
            query
                .push(" AND (name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR phone LIKE ")
                .push_bind(pattern)
                .push(")");
        }

        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let leads = query.build_query_as::<Lead>().fetch_all(&self.db).await?;
        Ok(leads)
    }

    async fn lead_status_counts(&self, organization_id: Uuid) -> StoreResult<Vec<StatusCount>> {
        let counts = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) AS count FROM leads
            WHERE organization_id = $1
            GROUP BY status
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.db)
        .await?;
        Ok(counts)
    }

    async fn compare_and_set_lead_status(
        &self,
        id: Uuid,
        expected: LeadStatus,
        next: LeadStatus,
    ) -> StoreResult<Option<Lead>> {
        let lead = sqlx::query_as(
            r#"
            UPDATE leads SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(next)
        .fetch_optional(&self.db)
        .await?;
        Ok(lead)
    }

    async fn set_lead_note(
        &self,
        organization_id: Uuid,
        id: Uuid,
        note: Option<&str>,
    ) -> StoreResult<Option<Lead>> {
        let lead = sqlx::query_as(
            r#"
            UPDATE leads SET note = $3, updated_at = NOW()
            WHERE id = $1 AND organization_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(note)
        .fetch_optional(&self.db)
        .await?;
        Ok(lead)
    }

    async fn insert_conversation(&self, conversation: NewConversation) -> StoreResult<Conversation> {
        sqlx::query_as(
            r#"
            INSERT INTO conversations (id, organization_id, lead_id, platform, external_thread_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation.organization_id)
        .bind(conversation.lead_id)
        .bind(conversation.platform)
        .bind(&conversation.external_thread_id)
        .fetch_one(&self.db)
        .await
        .map_err(map_insert_error)
    }

    async fn find_conversation_by_lead(
        &self,
        organization_id: Uuid,
        lead_id: Uuid,
    ) -> StoreResult<Option<Conversation>> {
        let conversation = sqlx::query_as(
            "SELECT * FROM conversations WHERE organization_id = $1 AND lead_id = $2",
        )
        .bind(organization_id)
        .bind(lead_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<Conversation>> {
        let conversation =
            sqlx::query_as("SELECT * FROM conversations WHERE id = $1 AND organization_id = $2")
                .bind(id)
                .bind(organization_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(conversation)
    }

    async fn list_conversations(
        &self,
        organization_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Conversation>> {
        let conversations = sqlx::query_as(
            r#"
            SELECT * FROM conversations
            WHERE organization_id = $1
            ORDER BY COALESCE(last_message_at, created_at) DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(organization_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(conversations)
    }

    async fn advance_conversation(
        &self,
        id: Uuid,
        update: &ProjectionUpdate,
    ) -> StoreResult<Conversation> {
        // Every SET expression sees the pre-update row, so the head only
        // moves when the new message is not older than it. The unread count
        // is recounted rather than incremented, which makes a replayed fold
        // harmless.
        let conversation = sqlx::query_as(
            r#"
            UPDATE conversations SET
                unread_count = (
                    SELECT COUNT(*) FROM messages m
                    WHERE m.conversation_id = conversations.id
                    AND m.direction = 'inbound'
                    AND (conversations.last_read_at IS NULL OR m.received_at > conversations.last_read_at)
                ),
                last_message = CASE
                    WHEN last_message_at IS NULL OR $2 >= last_message_at THEN $3
                    ELSE last_message END,
                last_message_at = CASE
                    WHEN last_message_at IS NULL OR $2 >= last_message_at THEN $2
                    ELSE last_message_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.message_at)
        .bind(&update.preview)
        .fetch_one(&self.db)
        .await?;
        Ok(conversation)
    }

    async fn reset_unread(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<Conversation>> {
        let conversation = sqlx::query_as(
            r#"
            UPDATE conversations SET unread_count = 0, last_read_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND organization_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(conversation)
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        sqlx::query_as(
            r#"
            INSERT INTO messages
                (id, conversation_id, lead_id, organization_id, content, type, direction, status,
                 external_id, file_url, file_name, caption, mime_type, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.conversation_id)
        .bind(message.lead_id)
        .bind(message.organization_id)
        .bind(&message.content)
        .bind(message.message_type)
        .bind(message.direction)
        .bind(message.status)
        .bind(&message.external_id)
        .bind(&message.metadata.file_url)
        .bind(&message.metadata.file_name)
        .bind(&message.metadata.caption)
        .bind(&message.metadata.mime_type)
        .bind(message.created_at)
        .fetch_one(&self.db)
        .await
        .map_err(map_insert_error)
    }

    async fn find_message_by_external_id(&self, external_id: &str) -> StoreResult<Option<Message>> {
        let message = sqlx::query_as("SELECT * FROM messages WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(message)
    }

    async fn latest_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>> {
        let message = sqlx::query_as(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(message)
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        filter: &MessageFilter,
    ) -> StoreResult<Vec<Message>> {
        let messages = sqlx::query_as(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1
            AND ($2::timestamptz IS NULL OR created_at > $2)
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(conversation_id)
        .bind(filter.after)
        .bind(filter.limit)
        .fetch_all(&self.db)
        .await?;
        Ok(messages)
    }

    async fn compare_and_set_message_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
    ) -> StoreResult<Option<Message>> {
        let message = sqlx::query_as(
            r#"
            UPDATE messages SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(next)
        .fetch_optional(&self.db)
        .await?;
        Ok(message)
    }
}
