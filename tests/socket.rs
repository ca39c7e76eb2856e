//! End-to-end WebSocket tests: a real listener on loopback, real clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use notifier::auth::{Claims, JwtVerifier};
use notifier::config::{Config, StoreBackend};
use notifier::metrics::DeliveryMetrics;
use notifier::models::notification::{FrameSnapshot, NewNotification, SenderSnapshot, UserId};
use notifier::notification::Notifier;
use notifier::realtime::registry::ConnectionRegistry;
use notifier::store::memory::MemoryStore;
use notifier::{api, AppState};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "socket-test-secret";

async fn spawn_server() -> (SocketAddr, Arc<AppState>) {
    let config = Config {
        store: StoreBackend::Memory,
        jwt_secret: SECRET.to_string(),
        push_timeout: Duration::from_millis(500),
        ..Config::default()
    };
    let notifier = Notifier::new(
        Arc::new(MemoryStore::new()),
        ConnectionRegistry::new(),
        config.notifier(),
        Arc::new(DeliveryMetrics::new().unwrap()),
    );
    let state = Arc::new(AppState {
        notifier,
        verifier: Arc::new(JwtVerifier::new(SECRET)),
        config,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn token_for(user: &str) -> String {
    let claims = Claims {
        sub: user.to_string(),
        exp: chrono::Utc::now().timestamp() + 3600,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn connect(addr: SocketAddr, user: &str) -> Client {
    let url = format!("ws://{}/ws?token={}", addr, token_for(user));
    let (client, _) = connect_async(url).await.unwrap();
    client
}

/// Next JSON event, skipping control frames.
async fn next_event(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send(client: &mut Client, request: Value) {
    client.send(Message::Text(request.to_string())).await.unwrap();
}

/// Connect and consume the `connected` + `unread_count` greeting.
async fn connect_greeted(addr: SocketAddr, user: &str) -> (Client, Value) {
    let mut client = connect(addr, user).await;
    let connected = next_event(&mut client).await;
    assert_eq!(connected["event"], "connected");
    let count = next_event(&mut client).await;
    assert_eq!(count["event"], "unread_count");
    (client, count)
}

fn like_for(recipient: &str) -> NewNotification {
    NewNotification::frame_like(
        recipient,
        SenderSnapshot::new("alice", "alice"),
        FrameSnapshot::new("frame-1", "Sunset"),
    )
}

#[tokio::test]
async fn test_handshake_requires_valid_token() {
    let (addr, _) = spawn_server().await;
    assert!(connect_async(format!("ws://{}/ws", addr)).await.is_err());
    assert!(connect_async(format!("ws://{}/ws?token=garbage", addr)).await.is_err());
}

#[tokio::test]
async fn test_greeting_reports_backlog() {
    let (addr, state) = spawn_server().await;
    state.notifier.deliver(like_for("bob")).await.unwrap();
    state.notifier.deliver(like_for("bob")).await.unwrap();

    let mut client = connect(addr, "bob").await;
    let connected = next_event(&mut client).await;
    assert_eq!(connected["event"], "connected");
    assert_eq!(connected["data"]["user_id"], "bob");
    assert_eq!(next_event(&mut client).await, json!({ "event": "unread_count", "data": { "count": 2 } }));
}

#[tokio::test]
async fn test_live_push_and_mark_read_roundtrip() {
    let (addr, state) = spawn_server().await;
    let (mut client, _) = connect_greeted(addr, "bob").await;

    let receipt = state.notifier.deliver(like_for("bob")).await.unwrap();
    let pushed = next_event(&mut client).await;
    assert_eq!(pushed["event"], "new_notification");
    assert_eq!(pushed["data"]["id"], receipt.notification.id.to_string());
    assert_eq!(pushed["data"]["type"], "frame_like");
    assert_eq!(next_event(&mut client).await["data"]["count"], 1);

    send(
        &mut client,
        json!({ "action": "mark_read", "request_id": "r1", "id": receipt.notification.id }),
    )
    .await;
    assert_eq!(next_event(&mut client).await, json!({ "event": "unread_count", "data": { "count": 0 } }));
    let reply = next_event(&mut client).await;
    assert_eq!(reply["event"], "notification_read");
    assert_eq!(reply["data"]["request_id"], "r1");
    assert_eq!(reply["data"]["notification"]["is_read"], true);
}

#[tokio::test]
async fn test_request_errors_are_scoped() {
    let (addr, _) = spawn_server().await;
    let (mut client, _) = connect_greeted(addr, "bob").await;

    send(
        &mut client,
        json!({ "action": "delete", "request_id": "d1", "id": uuid::Uuid::new_v4() }),
    )
    .await;
    let reply = next_event(&mut client).await;
    assert_eq!(reply["event"], "error");
    assert_eq!(reply["data"]["request_id"], "d1");
    assert_eq!(reply["data"]["code"], "not_found");

    // The session survives a failed request.
    send(&mut client, json!({ "action": "get_unread_count", "request_id": "c1" })).await;
    assert_eq!(next_event(&mut client).await["event"], "unread_count");
}

#[tokio::test]
async fn test_list_over_socket() {
    let (addr, state) = spawn_server().await;
    for _ in 0..3 {
        state.notifier.deliver(like_for("bob")).await.unwrap();
    }
    let (mut client, _) = connect_greeted(addr, "bob").await;

    send(
        &mut client,
        json!({ "action": "get_notifications", "request_id": "l1", "page": 2, "limit": 2 }),
    )
    .await;
    let reply = next_event(&mut client).await;
    assert_eq!(reply["event"], "notifications_list");
    assert_eq!(reply["data"]["request_id"], "l1");
    assert_eq!(reply["data"]["page"], 2);
    assert_eq!(reply["data"]["total"], 3);
    assert_eq!(reply["data"]["notifications"].as_array().unwrap().len(), 1);
    assert_eq!(reply["data"]["has_more"], false);
}

#[tokio::test]
async fn test_second_connection_evicts_first() {
    let (addr, state) = spawn_server().await;
    let bob = UserId::from("bob");
    let (mut old, _) = connect_greeted(addr, "bob").await;
    let (mut new, _) = connect_greeted(addr, "bob").await;
    assert_eq!(state.notifier.registry().online_count(), 1);

    // The evicted socket closing late must not unbind its replacement.
    old.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(state.notifier.registry().is_online(&bob));

    state.notifier.deliver(like_for("bob")).await.unwrap();
    assert_eq!(next_event(&mut new).await["event"], "new_notification");

    new.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!state.notifier.registry().is_online(&bob));

    // Missed while offline, still listable.
    state.notifier.deliver(like_for("bob")).await.unwrap();
    let page = state.notifier.list(&bob, &Default::default()).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.unread_count, 2);
}
