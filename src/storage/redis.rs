use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use uuid::Uuid;

use crate::{
    error::AppResult,
    services::events::{DashboardEvent, EventPublisher},
};

const EVENT_CHANNEL_PREFIX: &str = "events:";

pub fn event_channel(organization_id: Uuid) -> String {
    format!("{}{}", EVENT_CHANNEL_PREFIX, organization_id)
}

#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(url: &str) -> AppResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, conn })
    }

    pub async fn publish_event(&self, organization_id: Uuid, payload: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(event_channel(organization_id), payload).await?;
        Ok(())
    }

    /// Pattern subscription over every organization's event channel.
    pub async fn subscribe_events(&self) -> AppResult<redis::aio::PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub
            .psubscribe(format!("{}*", EVENT_CHANNEL_PREFIX))
            .await?;
        Ok(pubsub)
    }
}

#[async_trait]
impl EventPublisher for RedisClient {
    async fn publish(&self, event: &DashboardEvent) -> AppResult<()> {
        let payload = serde_json::to_string(event)?;
        self.publish_event(event.organization_id, &payload).await
    }
}
