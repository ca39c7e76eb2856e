//! WebSocket transport for live sessions.
//!
//! Each upgraded socket gets one outbound queue (`SessionHandle`) drained by a
//! writer task. Everything sent to the client, pushes and request replies
//! alike, goes through that queue, so per-session ordering is the queue order.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::auth::bearer_token;
use crate::errors::AppError;
use crate::models::notification::UserId;
use crate::notification::Notifier;
use crate::realtime::events::{ClientAction, ClientRequest, ListResponse, ServerEvent};
use crate::realtime::registry::{DeliveryError, SessionHandle};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    /// Browsers cannot set headers on a WebSocket handshake, so the token may
    /// also ride in the query string.
    pub token: Option<String>,
}

/// GET /ws: verify identity, then upgrade.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = bearer_token(&headers)
        .or(query.token)
        .ok_or(AppError::Unauthorized)?;
    let user = state.verifier.verify(&token).await.map_err(|e| {
        tracing::debug!("socket handshake rejected: {}", e);
        AppError::Unauthorized
    })?;

    Ok(ws.on_upgrade(move |socket| run_session(socket, state, user)))
}

async fn run_session(socket: WebSocket, state: Arc<AppState>, user: UserId) {
    let push_timeout = state.config.push_timeout;
    let registry = state.notifier.registry().clone();
    let metrics = state.notifier.metrics().clone();

    let (handle, mut rx) = SessionHandle::channel(state.config.session_queue);
    let session_id = handle.session_id();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(event = event.name(), "socket: failed to encode event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    registry.bind(user.clone(), handle.clone());
    metrics.set_online_sessions(registry.online_count());
    tracing::info!(user = %user, session = %session_id, "socket: session bound");

    let greeting = ServerEvent::Connected {
        user_id: user.clone(),
        session_id,
    };
    if handle.push(greeting, push_timeout).await.is_ok() {
        state.notifier.sync_unread(&user).await;
    }

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(user = %user, session = %session_id, "socket: read error: {}", e);
                break;
            }
        };

        let reply = match msg {
            Message::Text(text) => handle_text(&state.notifier, &user, &text).await,
            Message::Close(_) => break,
            // Ping/pong are answered by axum; binary frames are not part of the protocol.
            _ => continue,
        };

        if let Err(DeliveryError::Closed) = handle.push(reply, push_timeout).await {
            break;
        }
    }

    let unbound = registry.unbind_session(&user, session_id);
    metrics.set_online_sessions(registry.online_count());
    writer.abort();
    tracing::info!(
        user = %user,
        session = %session_id,
        evicted = !unbound,
        "socket: session closed"
    );
}

async fn handle_text(notifier: &Notifier, user: &UserId, text: &str) -> ServerEvent {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return bad_request(None, format!("malformed JSON: {}", e)),
    };
    // Recover the request id before the typed parse so even a bad action is
    // answered against the right request.
    let request_id = value
        .get("request_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    match serde_json::from_value::<ClientRequest>(value) {
        Ok(request) => handle_request(notifier, user, request).await,
        Err(e) => bad_request(request_id, format!("invalid request: {}", e)),
    }
}

fn bad_request(request_id: Option<String>, message: String) -> ServerEvent {
    ServerEvent::Error {
        request_id,
        code: "bad_request".to_string(),
        message,
    }
}

/// Map one client request onto the `Notifier`. Mutations sync the unread
/// count before returning, so the client sees `unread_count` ahead of the
/// direct reply.
pub async fn handle_request(notifier: &Notifier, user: &UserId, request: ClientRequest) -> ServerEvent {
    let ClientRequest { request_id, action } = request;

    let result = match action {
        ClientAction::GetNotifications(query) => notifier.list(user, &query).await.map(|page| {
            ServerEvent::NotificationsList(ListResponse {
                request_id: request_id.clone(),
                page,
            })
        }),
        ClientAction::MarkRead { id } => {
            notifier
                .mark_read(user, id)
                .await
                .map(|n| ServerEvent::NotificationRead {
                    request_id: request_id.clone(),
                    notification: n.view(),
                })
        }
        ClientAction::MarkAllRead => {
            notifier
                .mark_all_read(user)
                .await
                .map(|count| ServerEvent::AllNotificationsRead {
                    request_id: request_id.clone(),
                    count,
                })
        }
        ClientAction::Delete { id } => {
            notifier
                .delete(user, id)
                .await
                .map(|()| ServerEvent::NotificationDeleted {
                    request_id: request_id.clone(),
                    id,
                })
        }
        ClientAction::GetUnreadCount => notifier
            .unread_count(user)
            .await
            .map(|count| ServerEvent::UnreadCount { count }),
    };

    result.unwrap_or_else(|e| {
        tracing::debug!(user = %user, code = e.code(), "socket: request failed: {}", e);
        ServerEvent::error(request_id, &e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::DeliveryMetrics;
    use crate::models::notification::NewNotification;
    use crate::notification::NotifierConfig;
    use crate::realtime::registry::ConnectionRegistry;
    use crate::store::memory::MemoryStore;
    use uuid::Uuid;

    fn notifier() -> Notifier {
        Notifier::new(
            Arc::new(MemoryStore::new()),
            ConnectionRegistry::new(),
            NotifierConfig::default(),
            Arc::new(DeliveryMetrics::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_mark_read_unknown_id_is_scoped_error() {
        let n = notifier();
        let reply = handle_text(
            &n,
            &UserId::from("alice"),
            &format!(r#"{{"action":"mark_read","request_id":"r9","id":"{}"}}"#, Uuid::new_v4()),
        )
        .await;
        match reply {
            ServerEvent::Error { request_id, code, .. } => {
                assert_eq!(request_id.as_deref(), Some("r9"));
                assert_eq!(code, "not_found");
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_action_keeps_request_id() {
        let n = notifier();
        let reply = handle_text(&n, &UserId::from("alice"), r#"{"action":"explode","request_id":"r1"}"#).await;
        assert!(matches!(
            reply,
            ServerEvent::Error { request_id: Some(ref r), ref code, .. } if r == "r1" && code == "bad_request"
        ));
    }

    #[tokio::test]
    async fn test_garbage_is_bad_request() {
        let n = notifier();
        let reply = handle_text(&n, &UserId::from("alice"), "not json").await;
        assert!(matches!(reply, ServerEvent::Error { request_id: None, .. }));
    }

    #[tokio::test]
    async fn test_list_and_mark_all_read() {
        let n = notifier();
        let alice = UserId::from("alice");
        n.deliver(NewNotification::system("alice", "Hi", "Welcome")).await.unwrap();
        n.deliver(NewNotification::system("alice", "Hi again", "Still here")).await.unwrap();

        let reply = handle_text(&n, &alice, r#"{"action":"get_notifications","request_id":"l1","limit":1}"#).await;
        match reply {
            ServerEvent::NotificationsList(list) => {
                assert_eq!(list.request_id.as_deref(), Some("l1"));
                assert_eq!(list.page.notifications.len(), 1);
                assert_eq!(list.page.total, 2);
                assert!(list.page.has_more);
            }
            other => panic!("expected list, got {:?}", other),
        }

        let reply = handle_text(&n, &alice, r#"{"action":"mark_all_read"}"#).await;
        assert_eq!(reply, ServerEvent::AllNotificationsRead { request_id: None, count: 2 });

        let reply = handle_text(&n, &alice, r#"{"action":"get_unread_count"}"#).await;
        assert_eq!(reply, ServerEvent::UnreadCount { count: 0 });
    }
}
