//! Test utilities for the realtime integration tests
//!
//! Spins up the real router on an ephemeral port, backed by a seeded
//! in-memory store, static bearer tokens (`<user>-token`) and a push gateway
//! that records every offline notice.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatwire_backend::{
    auth::{Identity, TokenRegistry},
    config::Settings,
    models::{GroupMember, GroupRole, User},
    push::{OfflineNotice, PushError, PushGateway},
    storage::MemoryStorage,
    ws_router::create_router,
    AppState,
};
use chatwire_common::ServerFrame;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const USERS: [(&str, &str); 4] = [
    ("alice", "Alice"),
    ("bob", "Bob"),
    ("carol", "Carol"),
    ("dave", "Dave"),
];

struct RecordingPush(mpsc::UnboundedSender<OfflineNotice>);

#[async_trait]
impl PushGateway for RecordingPush {
    async fn notify_offline(&self, notice: OfflineNotice) -> Result<usize, PushError> {
        let _ = self.0.send(notice);
        Ok(1)
    }
}

/// A running server plus handles on its state
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub storage: Arc<MemoryStorage>,
    pushes: Mutex<mpsc::UnboundedReceiver<OfflineNotice>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start a server after letting the caller adjust the settings.
    ///
    /// alice, bob, carol and dave exist; alice (owner), bob and carol are
    /// members of `g1`. No contacts or blocks are seeded.
    pub async fn start_with(configure: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = Settings::default();
        configure(&mut settings);

        let storage = Arc::new(MemoryStorage::new());
        for (id, name) in USERS {
            storage.insert_user(User::new(id, name));
        }
        for (id, role) in [
            ("alice", GroupRole::Owner),
            ("bob", GroupRole::Member),
            ("carol", GroupRole::Member),
        ] {
            storage.add_group_member(GroupMember {
                group_id: "g1".to_string(),
                user_id: id.to_string(),
                role,
                joined_at: Utc::now(),
            });
        }

        let tokens = Arc::new(TokenRegistry::new());
        for (id, name) in USERS {
            tokens.insert_static(&format!("{id}-token"), Identity::new(id, name));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let state = AppState::new(storage.clone(), tokens, Arc::new(RecordingPush(tx)), settings);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let app = create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server error");
        });

        Self {
            addr,
            state,
            storage,
            pushes: Mutex::new(rx),
        }
    }

    /// Connect as `user_id` and wait until the hub has registered the session
    pub async fn connect(&self, user_id: &str) -> WsClient {
        let ws = self.connect_with_token(&format!("{user_id}-token")).await;
        self.wait_online(user_id).await;
        ws
    }

    pub async fn connect_with_token(&self, token: &str) -> WsClient {
        let url = format!("ws://{}/ws?token={token}", self.addr);
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("Failed to connect");
        ws
    }

    pub async fn wait_online(&self, user_id: &str) {
        self.wait_until(|| self.state.hub.is_online(user_id), "user online")
            .await;
    }

    pub async fn wait_offline(&self, user_id: &str) {
        self.wait_until(|| !self.state.hub.is_online(user_id), "user offline")
            .await;
    }

    async fn wait_until(&self, condition: impl Fn() -> bool, label: &str) {
        let polled = tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(polled.is_ok(), "Timed out waiting for: {label}");
    }

    pub async fn next_push(&self) -> Option<OfflineNotice> {
        let mut pushes = self.pushes.lock().await;
        tokio::time::timeout(Duration::from_secs(2), pushes.recv())
            .await
            .ok()
            .flatten()
    }

    /// True when no push arrives within a short grace period
    pub async fn no_push(&self) -> bool {
        let mut pushes = self.pushes.lock().await;
        tokio::time::timeout(Duration::from_millis(200), pushes.recv())
            .await
            .is_err()
    }
}

pub async fn send_json(ws: &mut WsClient, frame: serde_json::Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// Next server frame, skipping control frames. Panics on close or timeout.
pub async fn next_frame_with_timeout(ws: &mut WsClient, secs: u64, label: &str) -> ServerFrame {
    let received = tokio::time::timeout(Duration::from_secs(secs), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<ServerFrame>(text.as_str())
                        .unwrap_or_else(|e| panic!("{label}: bad server frame {}: {e}", text.as_str()));
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => panic!("{label}: socket ended with {other:?}"),
            }
        }
    })
    .await;
    received.unwrap_or_else(|_| panic!("Timeout waiting for {label}"))
}

/// Wait for the server to end the socket. Panics if a text frame arrives
/// first or the socket is still open after `secs`.
pub async fn expect_closed(ws: &mut WsClient, secs: u64, label: &str) {
    let ended = tokio::time::timeout(Duration::from_secs(secs), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => panic!("{label}: unexpected frame {}", text.as_str()),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(_)) | Some(Err(_)) | None => return,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "Timeout waiting for {label} to close");
}

/// Assert that no text frame arrives within `millis`
pub async fn expect_silence(ws: &mut WsClient, millis: u64) {
    let outcome = tokio::time::timeout(Duration::from_millis(millis), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => return other,
            }
        }
    })
    .await;
    if let Ok(other) = outcome {
        panic!("expected silence, got {other:?}");
    }
}
