use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Extension,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::{
    error::AppResult,
    services::{auth::Claims, events::DashboardEvent},
    storage::redis::RedisClient,
    AppState,
};

use super::middleware::get_org_id;

const CLIENT_BUFFER: usize = 256;
const RELAY_RETRY: Duration = Duration::from_secs(5);

type Clients = HashMap<Uuid, mpsc::Sender<DashboardEvent>>;

/// Dashboard sockets connected to this instance, grouped by organization.
#[derive(Default)]
pub struct WsHub {
    organizations: RwLock<HashMap<Uuid, Clients>>,
}

impl WsHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
        sender: mpsc::Sender<DashboardEvent>,
    ) {
        let mut organizations = self.organizations.write().await;
        organizations
            .entry(organization_id)
            .or_default()
            .insert(client_id, sender);
        tracing::info!("Client registered: {} ({})", client_id, organization_id);
    }

    pub async fn unregister(&self, organization_id: Uuid, client_id: Uuid) {
        let mut organizations = self.organizations.write().await;
        if let Some(clients) = organizations.get_mut(&organization_id) {
            clients.remove(&client_id);
            if clients.is_empty() {
                organizations.remove(&organization_id);
            }
        }
        tracing::info!("Client unregistered: {}", client_id);
    }

    pub async fn client_count(&self, organization_id: Uuid) -> usize {
        self.organizations
            .read()
            .await
            .get(&organization_id)
            .map_or(0, |clients| clients.len())
    }

    /// Delivers to every local client of the event's organization. Slow
    /// clients whose buffer is full miss the event.
    pub async fn broadcast(&self, event: &DashboardEvent) {
        let organizations = self.organizations.read().await;
        let Some(clients) = organizations.get(&event.organization_id) else {
            return;
        };
        for (client_id, sender) in clients {
            if sender.try_send(event.clone()).is_err() {
                tracing::debug!("Dropped event for client {}", client_id);
            }
        }
    }

    /// Forwards events published by any instance to local sockets.
    /// Resubscribes after Redis connection failures.
    pub async fn relay(self: Arc<Self>, redis: RedisClient) {
        loop {
            if let Err(e) = self.relay_once(&redis).await {
                tracing::warn!("Event relay interrupted: {}", e);
            }
            tokio::time::sleep(RELAY_RETRY).await;
        }
    }

    async fn relay_once(&self, redis: &RedisClient) -> AppResult<()> {
        let mut pubsub = redis.subscribe_events().await?;
        tracing::info!("Event relay subscribed");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("Unreadable event payload: {}", e);
                    continue;
                }
            };
            match serde_json::from_str::<DashboardEvent>(&payload) {
                Ok(event) => self.broadcast(&event).await,
                Err(e) => tracing::warn!("Malformed event on {}: {}", msg.get_channel_name(), e),
            }
        }
        Ok(())
    }
}

pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Response> {
    let organization_id = get_org_id(&claims)?;
    let hub = state.ws_hub.clone();

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, hub, organization_id)))
}

async fn handle_socket(socket: WebSocket, hub: Arc<WsHub>, organization_id: Uuid) {
    let client_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<DashboardEvent>(CLIENT_BUFFER);
    hub.register(organization_id, client_id, tx).await;

    let (pong_tx, mut pong_rx) = mpsc::channel::<()>(8);

    let send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(_) => continue,
                    },
                    None => break,
                },
                Some(()) = pong_rx.recv() => r#"{"type":"pong"}"#.to_string(),
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Clients only ever send keep-alives.
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) if text.contains("\"ping\"") => {
                    let _ = pong_tx.send(()).await;
                }
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    hub.unregister(organization_id, client_id).await;
}
