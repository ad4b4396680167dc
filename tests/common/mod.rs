#![allow(dead_code)]

use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tower::util::ServiceExt;
use uuid::Uuid;

use mets_leads_backend::api::websocket::WsHub;
use mets_leads_backend::build_app;
use mets_leads_backend::config::{
    AuthConfig, Config, DatabaseConfig, IngestConfig, JwtConfig, RedisConfig, ServerConfig,
    WebhookConfig,
};
use mets_leads_backend::error::AppResult;
use mets_leads_backend::models::{
    Campaign, CampaignMetrics, CampaignStatus, Conversation, IntegrationsUpdate, Integrations,
    Lead, LeadFilter, LeadStatus, Message, MessageFilter, MessageStatus, MetricsDelta,
    NewCampaign, NewConversation, NewLead, NewMessage, NewOrganization, NewUser, Organization,
    OrganizationSettings, ProjectionUpdate, StatusCount, User, UserCredentials,
};
use mets_leads_backend::services::events::{DashboardEvent, EventKind, EventPublisher};
use mets_leads_backend::store::{Constraint, EntityStore, PgStore, StoreError, StoreResult};
use mets_leads_backend::AppState;

pub const TEST_SECRET: &str = "whsec_test";
pub const TEST_VERIFY_TOKEN: &str = "verify-me";

#[derive(Default)]
struct Tables {
    organizations: HashMap<Uuid, Organization>,
    users: HashMap<Uuid, UserCredentials>,
    campaigns: HashMap<Uuid, Campaign>,
    leads: HashMap<Uuid, Lead>,
    conversations: HashMap<Uuid, Conversation>,
    messages: HashMap<Uuid, Message>,
}

/// In-process stand-in for Postgres. Enforces the same unique indexes and
/// yields before every operation so concurrent callers interleave.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    fn with<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> T {
        let mut tables = self.tables.lock().expect("store lock poisoned");
        f(&mut tables)
    }

    /// Overwrites a campaign's cached counters, simulating drift.
    pub fn corrupt_metrics(&self, campaign_id: Uuid, total: i64) {
        self.with(|t| {
            if let Some(campaign) = t.campaigns.get_mut(&campaign_id) {
                campaign.metrics.total_leads = total;
            }
        });
    }

    /// Simulates a drifted sidebar projection.
    pub fn corrupt_projection(&self, conversation_id: Uuid, unread_count: i64) {
        self.with(|t| {
            if let Some(conversation) = t.conversations.get_mut(&conversation_id) {
                conversation.last_message = String::new();
                conversation.last_message_at = None;
                conversation.unread_count = unread_count;
            }
        })
    }

    pub fn message_count(&self) -> usize {
        self.with(|t| t.messages.len())
    }

    pub fn conversation_count(&self) -> usize {
        self.with(|t| t.conversations.len())
    }

    pub fn lead_count(&self) -> usize {
        self.with(|t| t.leads.len())
    }
}

fn user_email_taken(tables: &Tables, email: &str) -> bool {
    tables
        .users
        .values()
        .any(|c| c.user.email.eq_ignore_ascii_case(email))
}

fn build_user(user: NewUser, now: DateTime<Utc>) -> UserCredentials {
    UserCredentials {
        user: User {
            id: Uuid::new_v4(),
            organization_id: user.organization_id,
            name: user.name,
            email: user.email,
            role: user.role,
            profile_image: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        },
        password_hash: user.password_hash,
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn create_organization(
        &self,
        organization: NewOrganization,
        owner: NewUser,
    ) -> StoreResult<(Organization, User)> {
        tokio::task::yield_now().await;
        self.with(|t| {
            if user_email_taken(t, &owner.email) {
                return Err(StoreError::Conflict(Constraint::UserEmail));
            }
            let now = Utc::now();
            let credentials = build_user(owner, now);
            let org = Organization {
                id: organization.id,
                name: organization.name,
                owner_id: Some(credentials.user.id),
                integrations: Integrations::default(),
                settings: OrganizationSettings::default(),
                created_at: now,
                updated_at: now,
            };
            let user = credentials.user.clone();
            t.organizations.insert(org.id, org.clone());
            t.users.insert(user.id, credentials);
            Ok((org, user))
        })
    }

    async fn get_organization(&self, id: Uuid) -> StoreResult<Option<Organization>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| t.organizations.get(&id).cloned()))
    }

    async fn update_integrations(
        &self,
        id: Uuid,
        update: &IntegrationsUpdate,
    ) -> StoreResult<Option<Organization>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.organizations.get_mut(&id).map(|org| {
                update.apply_to(&mut org.integrations);
                org.updated_at = Utc::now();
                org.clone()
            })
        }))
    }

    async fn update_settings(
        &self,
        id: Uuid,
        settings: &OrganizationSettings,
    ) -> StoreResult<Option<Organization>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.organizations.get_mut(&id).map(|org| {
                org.settings = settings.clone();
                org.updated_at = Utc::now();
                org.clone()
            })
        }))
    }

    async fn touch_meta_sync(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.with(|t| {
            if let Some(org) = t.organizations.get_mut(&id) {
                org.integrations.meta.meta_last_sync = Some(at);
            }
        });
        Ok(())
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        tokio::task::yield_now().await;
        self.with(|t| {
            if user_email_taken(t, &user.email) {
                return Err(StoreError::Conflict(Constraint::UserEmail));
            }
            let credentials = build_user(user, Utc::now());
            let user = credentials.user.clone();
            t.users.insert(user.id, credentials);
            Ok(user)
        })
    }

    async fn find_user_credentials(&self, email: &str) -> StoreResult<Option<UserCredentials>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.users
                .values()
                .find(|c| c.user.email.eq_ignore_ascii_case(email))
                .cloned()
        }))
    }

    async fn get_user(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<User>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.users
                .get(&id)
                .filter(|c| c.user.organization_id == organization_id)
                .map(|c| c.user.clone())
        }))
    }

    async fn list_users(&self, organization_id: Uuid) -> StoreResult<Vec<User>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            let mut users: Vec<User> = t
                .users
                .values()
                .filter(|c| c.user.organization_id == organization_id)
                .map(|c| c.user.clone())
                .collect();
            users.sort_by_key(|u| u.created_at);
            users
        }))
    }

    async fn update_user_name(
        &self,
        organization_id: Uuid,
        id: Uuid,
        name: &str,
    ) -> StoreResult<Option<User>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.users
                .get_mut(&id)
                .filter(|c| c.user.organization_id == organization_id)
                .map(|c| {
                    c.user.name = name.to_string();
                    c.user.updated_at = Utc::now();
                    c.user.clone()
                })
        }))
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.with(|t| {
            if let Some(c) = t.users.get_mut(&id) {
                c.user.last_login_at = Some(at);
            }
        });
        Ok(())
    }

    async fn insert_campaign(&self, campaign: NewCampaign) -> StoreResult<Campaign> {
        tokio::task::yield_now().await;
        self.with(|t| {
            let taken = t.campaigns.values().any(|c| {
                c.organization_id == campaign.organization_id
                    && c.external_id == campaign.external_id
            });
            if taken {
                return Err(StoreError::Conflict(Constraint::CampaignExternalId));
            }
            let now = Utc::now();
            let row = Campaign {
                id: Uuid::new_v4(),
                organization_id: campaign.organization_id,
                external_id: campaign.external_id,
                external_ad_account_id: campaign.external_ad_account_id,
                name: campaign.name,
                description: campaign.description,
                platform: campaign.platform,
                status: campaign.status,
                template_name: None,
                metrics: CampaignMetrics::empty(now),
                created_at: now,
                updated_at: now,
            };
            t.campaigns.insert(row.id, row.clone());
            Ok(row)
        })
    }

    async fn find_campaign_by_external_id(
        &self,
        organization_id: Uuid,
        external_id: &str,
    ) -> StoreResult<Option<Campaign>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.campaigns
                .values()
                .find(|c| c.organization_id == organization_id && c.external_id == external_id)
                .cloned()
        }))
    }

    async fn get_campaign(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<Campaign>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.campaigns
                .get(&id)
                .filter(|c| c.organization_id == organization_id)
                .cloned()
        }))
    }

    async fn list_campaigns(&self, organization_id: Uuid) -> StoreResult<Vec<Campaign>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            let mut campaigns: Vec<Campaign> = t
                .campaigns
                .values()
                .filter(|c| c.organization_id == organization_id)
                .cloned()
                .collect();
            campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            campaigns
        }))
    }

    async fn set_campaign_status(
        &self,
        organization_id: Uuid,
        id: Uuid,
        status: CampaignStatus,
    ) -> StoreResult<Option<Campaign>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.campaigns
                .get_mut(&id)
                .filter(|c| c.organization_id == organization_id)
                .map(|c| {
                    c.status = status;
                    c.updated_at = Utc::now();
                    c.clone()
                })
        }))
    }

    async fn set_campaign_template(
        &self,
        organization_id: Uuid,
        id: Uuid,
        template_name: Option<&str>,
    ) -> StoreResult<Option<Campaign>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.campaigns
                .get_mut(&id)
                .filter(|c| c.organization_id == organization_id)
                .map(|c| {
                    c.template_name = template_name.map(str::to_string);
                    c.updated_at = Utc::now();
                    c.clone()
                })
        }))
    }

    async fn delete_campaign(&self, organization_id: Uuid, id: Uuid) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            let owned = t
                .campaigns
                .get(&id)
                .is_some_and(|c| c.organization_id == organization_id);
            if !owned {
                return false;
            }
            t.campaigns.remove(&id);
            for lead in t.leads.values_mut() {
                if lead.campaign_id == Some(id) {
                    lead.campaign_id = None;
                }
            }
            true
        }))
    }

    async fn adjust_campaign_metrics(
        &self,
        id: Uuid,
        delta: MetricsDelta,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.with(|t| {
            if let Some(c) = t.campaigns.get_mut(&id) {
                c.metrics.apply(delta, at);
            }
        });
        Ok(())
    }

    async fn replace_campaign_metrics(
        &self,
        id: Uuid,
        metrics: &CampaignMetrics,
    ) -> StoreResult<Option<Campaign>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.campaigns.get_mut(&id).map(|c| {
                c.metrics = metrics.clone();
                c.clone()
            })
        }))
    }

    async fn campaign_status_counts(&self, campaign_id: Uuid) -> StoreResult<Vec<StatusCount>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            count_statuses(t.leads.values().filter(|l| l.campaign_id == Some(campaign_id)))
        }))
    }

    async fn insert_lead(&self, lead: NewLead) -> StoreResult<Lead> {
        tokio::task::yield_now().await;
        self.with(|t| {
            if t.leads.values().any(|l| l.external_id == lead.external_id) {
                return Err(StoreError::Conflict(Constraint::LeadExternalId));
            }
            let now = Utc::now();
            let row = Lead {
                id: Uuid::new_v4(),
                organization_id: lead.organization_id,
                campaign_id: lead.campaign_id,
                external_id: lead.external_id,
                name: lead.name,
                phone: lead.phone,
                email: lead.email,
                status: LeadStatus::New,
                note: None,
                created_at: now,
                updated_at: now,
            };
            t.leads.insert(row.id, row.clone());
            Ok(row)
        })
    }

    async fn find_lead_by_external_id(&self, external_id: &str) -> StoreResult<Option<Lead>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.leads
                .values()
                .find(|l| l.external_id == external_id)
                .cloned()
        }))
    }

    async fn get_lead(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<Lead>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.leads
                .get(&id)
                .filter(|l| l.organization_id == organization_id)
                .cloned()
        }))
    }

    async fn query_leads(&self, organization_id: Uuid, filter: &LeadFilter) -> StoreResult<Vec<Lead>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            let mut leads: Vec<Lead> = t
                .leads
                .values()
                .filter(|l| l.organization_id == organization_id && filter.matches(l))
                .cloned()
                .collect();
            leads.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            leads
                .into_iter()
                .skip(filter.offset.max(0) as usize)
                .take(filter.limit.max(0) as usize)
                .collect()
        }))
    }

    async fn lead_status_counts(&self, organization_id: Uuid) -> StoreResult<Vec<StatusCount>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            count_statuses(t.leads.values().filter(|l| l.organization_id == organization_id))
        }))
    }

    async fn compare_and_set_lead_status(
        &self,
        id: Uuid,
        expected: LeadStatus,
        next: LeadStatus,
    ) -> StoreResult<Option<Lead>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.leads
                .get_mut(&id)
                .filter(|l| l.status == expected)
                .map(|l| {
                    l.status = next;
                    l.updated_at = Utc::now();
                    l.clone()
                })
        }))
    }

    async fn set_lead_note(
        &self,
        organization_id: Uuid,
        id: Uuid,
        note: Option<&str>,
    ) -> StoreResult<Option<Lead>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.leads
                .get_mut(&id)
                .filter(|l| l.organization_id == organization_id)
                .map(|l| {
                    l.note = note.map(str::to_string);
                    l.updated_at = Utc::now();
                    l.clone()
                })
        }))
    }

    async fn insert_conversation(&self, conversation: NewConversation) -> StoreResult<Conversation> {
        tokio::task::yield_now().await;
        self.with(|t| {
            let taken = t.conversations.values().any(|c| {
                c.organization_id == conversation.organization_id
                    && c.lead_id == conversation.lead_id
            });
            if taken {
                return Err(StoreError::Conflict(Constraint::ConversationLead));
            }
            let now = Utc::now();
            let row = Conversation {
                id: Uuid::new_v4(),
                organization_id: conversation.organization_id,
                lead_id: conversation.lead_id,
                last_message: String::new(),
                last_message_at: None,
                unread_count: 0,
                last_read_at: None,
                platform: conversation.platform,
                external_thread_id: conversation.external_thread_id,
                created_at: now,
                updated_at: now,
            };
            t.conversations.insert(row.id, row.clone());
            Ok(row)
        })
    }

    async fn find_conversation_by_lead(
        &self,
        organization_id: Uuid,
        lead_id: Uuid,
    ) -> StoreResult<Option<Conversation>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.conversations
                .values()
                .find(|c| c.organization_id == organization_id && c.lead_id == lead_id)
                .cloned()
        }))
    }

    async fn get_conversation(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<Conversation>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.conversations
                .get(&id)
                .filter(|c| c.organization_id == organization_id)
                .cloned()
        }))
    }

    async fn list_conversations(
        &self,
        organization_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Conversation>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            let mut conversations: Vec<Conversation> = t
                .conversations
                .values()
                .filter(|c| c.organization_id == organization_id)
                .cloned()
                .collect();
            conversations.sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
            conversations
                .into_iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .collect()
        }))
    }

    async fn advance_conversation(
        &self,
        id: Uuid,
        update: &ProjectionUpdate,
    ) -> StoreResult<Conversation> {
        tokio::task::yield_now().await;
        self.with(|t| {
            let conversation = t
                .conversations
                .get_mut(&id)
                .ok_or(StoreError::Database(sqlx::Error::RowNotFound))?;
            conversation.apply_projection(update, t.messages.values());
            conversation.updated_at = Utc::now();
            Ok(conversation.clone())
        })
    }

    async fn reset_unread(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<Conversation>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.conversations
                .get_mut(&id)
                .filter(|c| c.organization_id == organization_id)
                .map(|c| {
                    c.unread_count = 0;
                    c.last_read_at = Some(Utc::now());
                    c.clone()
                })
        }))
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        tokio::task::yield_now().await;
        self.with(|t| {
            if let Some(external_id) = &message.external_id {
                if t.messages
                    .values()
                    .any(|m| m.external_id.as_ref() == Some(external_id))
                {
                    return Err(StoreError::Conflict(Constraint::MessageExternalId));
                }
            }
            let row = Message {
                id: Uuid::new_v4(),
                conversation_id: message.conversation_id,
                lead_id: message.lead_id,
                organization_id: message.organization_id,
                content: message.content,
                message_type: message.message_type,
                direction: message.direction,
                status: message.status,
                external_id: message.external_id,
                metadata: message.metadata,
                created_at: message.created_at,
                received_at: Utc::now(),
                updated_at: Utc::now(),
            };
            t.messages.insert(row.id, row.clone());
            Ok(row)
        })
    }

    async fn find_message_by_external_id(&self, external_id: &str) -> StoreResult<Option<Message>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.messages
                .values()
                .find(|m| m.external_id.as_deref() == Some(external_id))
                .cloned()
        }))
    }

    async fn latest_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.messages
                .values()
                .filter(|m| m.conversation_id == conversation_id)
                .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
                .cloned()
        }))
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        filter: &MessageFilter,
    ) -> StoreResult<Vec<Message>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            let mut messages: Vec<Message> = t
                .messages
                .values()
                .filter(|m| m.conversation_id == conversation_id)
                .filter(|m| filter.after.map_or(true, |after| m.created_at > after))
                .cloned()
                .collect();
            messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            messages.truncate(filter.limit.max(0) as usize);
            messages
        }))
    }

    async fn compare_and_set_message_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
    ) -> StoreResult<Option<Message>> {
        tokio::task::yield_now().await;
        Ok(self.with(|t| {
            t.messages
                .get_mut(&id)
                .filter(|m| m.status == expected)
                .map(|m| {
                    m.status = next;
                    m.updated_at = Utc::now();
                    m.clone()
                })
        }))
    }
}

fn count_statuses<'a>(leads: impl Iterator<Item = &'a Lead>) -> Vec<StatusCount> {
    let mut counts: HashMap<LeadStatus, i64> = HashMap::new();
    for lead in leads {
        *counts.entry(lead.status).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(status, count)| StatusCount { status, count })
        .collect()
}

/// Captures published events instead of sending them to Redis.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<DashboardEvent>>,
}

impl RecordingPublisher {
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events
            .lock()
            .expect("publisher lock poisoned")
            .iter()
            .map(|e| e.kind)
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DashboardEvent) -> AppResult<()> {
        self.events
            .lock()
            .expect("publisher lock poisoned")
            .push(event.clone());
        Ok(())
    }
}

pub fn test_config(signed_webhooks: bool) -> Config {
    let secret = signed_webhooks.then(|| TEST_SECRET.to_string());
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
        },
        database: DatabaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "mets_leads_test".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 1,
        },
        redis: RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
        },
        jwt: JwtConfig {
            secret: "test-secret".to_string(),
            access_token_ttl: Duration::from_secs(3600),
            issuer: "test-issuer".to_string(),
        },
        auth: AuthConfig { bcrypt_cost: 4 },
        webhooks: WebhookConfig {
            meta_app_secret: secret.clone(),
            meta_verify_token: Some(TEST_VERIFY_TOKEN.to_string()),
            whatsapp_secret: secret,
        },
        ingest: IngestConfig::default(),
    }
}

/// Store, publisher and config wired together for service-level tests.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub events: Arc<RecordingPublisher>,
    pub config: Arc<Config>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::default()),
            events: Arc::new(RecordingPublisher::default()),
            config: Arc::new(test_config(false)),
        }
    }

    pub fn store(&self) -> Arc<dyn EntityStore> {
        self.store.clone()
    }

    pub fn events(&self) -> Arc<dyn EventPublisher> {
        self.events.clone()
    }

    /// Creates an organization directly in the store.
    pub async fn organization(&self, name: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.store
            .create_organization(
                NewOrganization {
                    id,
                    name: name.to_string(),
                },
                NewUser {
                    organization_id: id,
                    name: format!("{name} owner"),
                    email: format!("owner-{id}@example.com"),
                    password_hash: "unused".to_string(),
                    role: mets_leads_backend::models::UserRole::Admin,
                },
            )
            .await
            .context("failed to create organization")?;
        Ok(id)
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub events: Arc<RecordingPublisher>,
    router: Router,
}

pub struct Session {
    pub token: String,
    pub organization_id: Uuid,
}

impl TestApp {
    pub fn new(signed_webhooks: bool) -> Self {
        let store = Arc::new(MemoryStore::default());
        let events = Arc::new(RecordingPublisher::default());
        let state = AppState {
            store: store.clone(),
            events: events.clone(),
            config: Arc::new(test_config(signed_webhooks)),
            ws_hub: Arc::new(WsHub::new()),
        };

        Self {
            store,
            events,
            router: build_app(state),
        }
    }

    pub async fn signup(&self, organization: &str, email: &str) -> Result<Session> {
        let response = self
            .post_json(
                "/api/v1/auth/signup",
                None,
                &json!({
                    "organization_name": organization,
                    "name": "Owner",
                    "email": email,
                    "password": "correct-horse",
                }),
            )
            .await?;
        anyhow::ensure!(
            response.status() == StatusCode::OK,
            "signup failed with status {}",
            response.status()
        );
        let body = body_json(response).await?;
        Ok(Session {
            token: body["token"]["access_token"]
                .as_str()
                .context("token missing")?
                .to_string(),
            organization_id: body["organization"]["id"]
                .as_str()
                .context("organization id missing")?
                .parse()?,
        })
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        let response = self
            .post_json(
                "/api/v1/auth/login",
                None,
                &json!({ "email": email, "password": password }),
            )
            .await?;
        anyhow::ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );
        let body = body_json(response).await?;
        Ok(body["token"]["access_token"]
            .as_str()
            .context("token missing")?
            .to_string())
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Result<Response<Body>> {
        self.send(Method::GET, uri, token, Body::empty(), None).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> Result<Response<Body>> {
        self.send(Method::DELETE, uri, Some(token), Body::empty(), None)
            .await
    }

    pub async fn post_json<T: Serialize>(
        &self,
        uri: &str,
        token: Option<&str>,
        payload: &T,
    ) -> Result<Response<Body>> {
        self.json(Method::POST, uri, token, payload).await
    }

    pub async fn json<T: Serialize>(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        payload: &T,
    ) -> Result<Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.send(method, uri, token, Body::from(body), Some("application/json"))
            .await
    }

    /// Posts a raw webhook body with an optional `X-Hub-Signature-256` header.
    pub async fn webhook(
        &self,
        uri: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<Response<Body>> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header("x-hub-signature-256", signature);
        }
        let request = builder.body(Body::from(body.to_vec()))?;
        Ok(self.router.clone().oneshot(request).await?)
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Body,
        content_type: Option<&str>,
    ) -> Result<Response<Body>> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        let request = builder.body(body)?;
        Ok(self.router.clone().oneshot(request).await?)
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body.collect().await.context("failed to read body")?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn body_json(response: Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response was not JSON")
}

/// Service wiring over the production store. Returns `None` when
/// `TEST_DATABASE_URL` is unset so the rest of the suite still runs
/// without a database.
pub struct PgHarness {
    pub store: Arc<PgStore>,
    pub events: Arc<RecordingPublisher>,
    pub config: Arc<Config>,
}

impl PgHarness {
    pub async fn connect() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping Postgres test");
            return Ok(None);
        };

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .context("failed to connect to TEST_DATABASE_URL")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;

        Ok(Some(Self {
            store: Arc::new(PgStore::new(pool)),
            events: Arc::new(RecordingPublisher::default()),
            config: Arc::new(test_config(false)),
        }))
    }

    pub fn store(&self) -> Arc<dyn EntityStore> {
        self.store.clone()
    }

    pub fn events(&self) -> Arc<dyn EventPublisher> {
        self.events.clone()
    }

    /// Fresh tenant per test; rows are never shared between tests.
    pub async fn organization(&self, name: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.store
            .create_organization(
                NewOrganization {
                    id,
                    name: name.to_string(),
                },
                NewUser {
                    organization_id: id,
                    name: format!("{name} owner"),
                    email: format!("owner-{id}@example.com"),
                    password_hash: "unused".to_string(),
                    role: mets_leads_backend::models::UserRole::Admin,
                },
            )
            .await
            .context("failed to create organization")?;
        Ok(id)
    }
}

/// External ids are globally unique, so tests sharing a database need
/// their own.
pub fn unique_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}
