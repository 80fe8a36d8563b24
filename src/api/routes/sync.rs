//! Reactive sync feed over WebSocket.
//!
//! `GET /sync?workspace_id=...` upgrades to a socket that receives every change event of
//! the workspace as a JSON text frame, in publish order. `kinds=http,node` narrows the
//! feed. Browsers pass the access token as `access_token` in the query string.

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::app_state::{AppState, require_role};
use super::auth_context::{CurrentUser, parse_id};
use super::error::{ApiError, ApiResult};
use crate::ids::Id;
use crate::models::Role;
use crate::services::event_sync::{
    EventKind, Subscription, SyncEvent, SyncStreamer, SyncTopic, TopicFilter,
};

#[derive(Deserialize)]
pub struct SyncQuery {
    workspace_id: String,
    #[serde(default)]
    kinds: Option<String>,
}

pub fn sync_router() -> Router<AppState> {
    Router::new().route("/sync", get(sync_socket))
}

fn parse_kinds(raw: &str) -> ApiResult<HashSet<EventKind>> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| {
            serde_json::from_value(serde_json::Value::String(k.to_string()))
                .map_err(|_| ApiError::invalid_field("kinds", &format!("unknown kind {}", k)))
        })
        .collect()
}

fn topic_filter(workspace_id: Id, kinds: Option<HashSet<EventKind>>) -> TopicFilter<SyncTopic> {
    Arc::new(move |topic: &SyncTopic| {
        topic.workspace_id == workspace_id
            && kinds.as_ref().is_none_or(|k| k.contains(&topic.kind))
    })
}

/// GET /sync - Upgrade to the change feed of one workspace
pub async fn sync_socket(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<SyncQuery>,
    upgrade: WebSocketUpgrade,
) -> ApiResult<Response> {
    let workspace_id = parse_id("workspace_id", &query.workspace_id)?;
    let kinds = query.kinds.as_deref().map(parse_kinds).transpose()?;
    {
        let reader = state.store.reader().await?;
        require_role(&reader, workspace_id, user.id(), Role::Member)?;
    }
    let events = state.events.clone();
    let shutdown = state.shutdown.clone();
    let user_id = user.id();
    Ok(upgrade.on_upgrade(move |socket| async move {
        let subscription = events.subscribe(topic_filter(workspace_id, kinds)).await;
        info!("Sync feed opened for {} on {}", user_id, workspace_id);
        forward(socket, subscription, shutdown).await;
        info!("Sync feed closed for {} on {}", user_id, workspace_id);
    }))
}

async fn forward(
    mut socket: WebSocket,
    mut subscription: Subscription<SyncTopic, SyncEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            event = subscription.recv() => {
                let Some((_, event)) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Dropping unserialisable sync event {}: {}", event.id, e);
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    debug!("Sync client went away mid-send");
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
