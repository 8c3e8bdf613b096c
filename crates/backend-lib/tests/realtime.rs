//! End-to-end tests against a live server: real sockets, real pumps.

mod common;

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::Request;
use chatwire_backend::storage::Storage;
use chatwire_backend::ws_router::{create_router, HealthStatus};
use chatwire_common::{MessageStatus, ServerFrame};
use common::{expect_closed, expect_silence, next_frame_with_timeout, send_json, TestServer};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

fn ack_of(frame: ServerFrame) -> (String, MessageStatus) {
    match frame {
        ServerFrame::Ack {
            message_id, status, ..
        } => (message_id, status),
        other => panic!("expected ack, got {other:?}"),
    }
}

#[tokio::test]
async fn test_direct_message_to_online_user() {
    let server = TestServer::start().await;
    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;

    send_json(&mut alice, json!({"type": "message", "to": "bob", "content": "hi"})).await;

    let (message_id, status) = ack_of(next_frame_with_timeout(&mut alice, 5, "alice ack").await);
    assert_eq!(status, MessageStatus::Delivered);

    match next_frame_with_timeout(&mut bob, 5, "bob message").await {
        ServerFrame::Message(message) => {
            assert_eq!(message.id, message_id);
            assert_eq!(message.from, "alice");
            assert_eq!(message.to.as_deref(), Some("bob"));
            assert_eq!(message.content, "hi");
        },
        other => panic!("expected message, got {other:?}"),
    }

    let stored = server.storage.get_message(&message_id).await.unwrap();
    assert_eq!(stored.status, MessageStatus::Delivered);
    assert!(server.no_push().await);
}

#[tokio::test]
async fn test_direct_message_to_offline_user_pushes() {
    let server = TestServer::start().await;
    let mut alice = server.connect("alice").await;

    send_json(&mut alice, json!({"type": "message", "to": "bob", "content": "hi"})).await;

    let (message_id, status) = ack_of(next_frame_with_timeout(&mut alice, 5, "alice ack").await);
    assert_eq!(status, MessageStatus::Sent);

    let notice = server.next_push().await.expect("offline push");
    assert_eq!(notice.recipient_id, "bob");
    assert_eq!(notice.sender_id, "alice");
    assert_eq!(notice.preview, "hi");
    assert!(!notice.is_group);
    assert_eq!(notice.conversation_id, "bob");

    let stored = server.storage.get_message(&message_id).await.unwrap();
    assert_eq!(stored.status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_blocked_sender_is_refused() {
    let server = TestServer::start().await;
    server.storage.add_block("bob", "alice");
    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;

    send_json(&mut alice, json!({"type": "message", "to": "bob", "content": "hi"})).await;

    assert_eq!(
        next_frame_with_timeout(&mut alice, 5, "alice error").await,
        ServerFrame::error("Cannot send message to this user")
    );
    assert_eq!(server.storage.message_count(), 0);
    expect_silence(&mut bob, 200).await;
}

#[tokio::test]
async fn test_group_fan_out_with_offline_member() {
    let server = TestServer::start().await;
    let mut alice = server.connect("alice").await;
    let mut carol = server.connect("carol").await;

    send_json(&mut alice, json!({"type": "message", "group_id": "g1", "content": "hey"})).await;

    let (message_id, status) = ack_of(next_frame_with_timeout(&mut alice, 5, "alice ack").await);
    assert_eq!(status, MessageStatus::Delivered);

    match next_frame_with_timeout(&mut carol, 5, "carol message").await {
        ServerFrame::Message(message) => {
            assert_eq!(message.id, message_id);
            assert_eq!(message.from, "alice");
            assert_eq!(message.group_id.as_deref(), Some("g1"));
        },
        other => panic!("expected message, got {other:?}"),
    }

    let notice = server.next_push().await.expect("push for bob");
    assert_eq!(notice.recipient_id, "bob");
    assert!(notice.is_group);
    assert_eq!(notice.conversation_id, "g1");
    assert!(server.no_push().await, "only bob missed the message");

    // the sender never hears its own group message
    expect_silence(&mut alice, 200).await;

    let stored = server.storage.get_message(&message_id).await.unwrap();
    assert_eq!(stored.status, MessageStatus::Delivered);
}

#[tokio::test]
async fn test_edit_reaches_both_participants() {
    let server = TestServer::start().await;
    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;

    send_json(&mut alice, json!({"type": "message", "to": "bob", "content": "fxied"})).await;
    let (message_id, _) = ack_of(next_frame_with_timeout(&mut alice, 5, "alice ack").await);
    next_frame_with_timeout(&mut bob, 5, "bob message").await;

    send_json(
        &mut alice,
        json!({"type": "message_edit", "message_id": message_id, "content": "fixed"}),
    )
    .await;

    for (ws, label) in [(&mut alice, "alice edit"), (&mut bob, "bob edit")] {
        match next_frame_with_timeout(ws, 5, label).await {
            ServerFrame::MessageEdited {
                message_id: edited, content, ..
            } => {
                assert_eq!(edited, message_id);
                assert_eq!(content, "fixed");
            },
            other => panic!("{label}: expected message_edited, got {other:?}"),
        }
    }

    let stored = server.storage.get_message(&message_id).await.unwrap();
    assert_eq!(stored.content, "fixed");
    assert!(stored.edited_at.is_some());
}

#[tokio::test]
async fn test_second_socket_replaces_first() {
    let server = TestServer::start().await;
    let mut first = server.connect("alice").await;
    let first_id = server.state.hub.session("alice").unwrap().id();

    let mut second = server.connect_with_token("alice-token").await;
    expect_closed(&mut first, 5, "evicted socket").await;

    let current = server.state.hub.session("alice").unwrap();
    assert_ne!(current.id(), first_id);
    assert!(server.state.hub.is_online("alice"));

    let mut bob = server.connect("bob").await;
    send_json(&mut bob, json!({"type": "message", "to": "alice", "content": "hello"})).await;
    let (_, status) = ack_of(next_frame_with_timeout(&mut bob, 5, "bob ack").await);
    assert_eq!(status, MessageStatus::Delivered);

    match next_frame_with_timeout(&mut second, 5, "second socket message").await {
        ServerFrame::Message(message) => assert_eq!(message.content, "hello"),
        other => panic!("expected message, got {other:?}"),
    }
    assert_eq!(server.state.hub.online_count(), 2);
}

#[tokio::test]
async fn test_bad_frames_keep_the_socket_open() {
    let server = TestServer::start().await;
    let mut alice = server.connect("alice").await;

    send_json(&mut alice, json!({"type": "call", "to": "bob"})).await;
    assert_eq!(
        next_frame_with_timeout(&mut alice, 5, "unknown type").await,
        ServerFrame::error("Unknown message type: call")
    );

    alice
        .send(Message::Text("not json".into()))
        .await
        .unwrap();
    assert!(matches!(
        next_frame_with_timeout(&mut alice, 5, "malformed").await,
        ServerFrame::Error { .. }
    ));

    send_json(&mut alice, json!({"type": "message", "to": "dave", "content": "still here"})).await;
    let (_, status) = ack_of(next_frame_with_timeout(&mut alice, 5, "ack after errors").await);
    assert_eq!(status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_invalid_token_is_closed() {
    let server = TestServer::start().await;

    let mut ws = server.connect_with_token("not-a-token").await;
    expect_closed(&mut ws, 5, "unauthenticated socket").await;

    let url = format!("ws://{}/ws", server.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    expect_closed(&mut ws, 5, "socket without token").await;

    assert_eq!(server.state.hub.online_count(), 0);
}

#[tokio::test]
async fn test_oversized_frame_ends_session() {
    let server = TestServer::start_with(|settings| settings.realtime.max_frame_bytes = 1024).await;
    let mut alice = server.connect("alice").await;

    let content = "x".repeat(4096);
    send_json(&mut alice, json!({"type": "message", "to": "bob", "content": content})).await;

    expect_closed(&mut alice, 5, "oversized frame").await;
    server.wait_offline("alice").await;
    assert_eq!(server.storage.message_count(), 0);
}

#[tokio::test]
async fn test_silent_peer_times_out() {
    let server = TestServer::start_with(|settings| {
        settings.realtime.pong_wait_ms = 300;
        settings.realtime.ping_period_ms = 100;
    })
    .await;
    let mut alice = server.connect("alice").await;

    // not polling the socket means no pong goes back
    tokio::time::sleep(Duration::from_millis(800)).await;
    server.wait_offline("alice").await;
    expect_closed(&mut alice, 5, "silent peer").await;
}

#[tokio::test]
async fn test_responsive_peer_stays_connected() {
    let server = TestServer::start_with(|settings| {
        settings.realtime.pong_wait_ms = 400;
        settings.realtime.ping_period_ms = 100;
    })
    .await;
    let mut alice = server.connect("alice").await;

    // reading answers pings automatically
    let until = tokio::time::Instant::now() + Duration::from_millis(1200);
    loop {
        match tokio::time::timeout_at(until, alice.next()).await {
            Err(_) => break,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(other) => panic!("socket should stay open, got {other:?}"),
        }
    }

    assert!(server.state.hub.is_online("alice"));
    send_json(&mut alice, json!({"type": "message", "to": "dave", "content": "alive"})).await;
    let (_, status) = ack_of(next_frame_with_timeout(&mut alice, 5, "ack").await);
    assert_eq!(status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_presence_reaches_contacts() {
    let server = TestServer::start().await;
    // bob keeps alice in his contacts
    server.storage.add_contact("bob", "alice");
    let mut bob = server.connect("bob").await;

    let alice = server.connect("alice").await;
    match next_frame_with_timeout(&mut bob, 5, "online presence").await {
        ServerFrame::Presence {
            user_id,
            online,
            last_seen,
        } => {
            assert_eq!(user_id, "alice");
            assert!(online);
            assert!(last_seen.is_none());
        },
        other => panic!("expected presence, got {other:?}"),
    }

    drop(alice);
    match next_frame_with_timeout(&mut bob, 5, "offline presence").await {
        ServerFrame::Presence {
            user_id,
            online,
            last_seen,
        } => {
            assert_eq!(user_id, "alice");
            assert!(!online);
            assert!(last_seen.is_some());
        },
        other => panic!("expected presence, got {other:?}"),
    }

    let alice_row = server.storage.get_user("alice").await.unwrap();
    assert!(alice_row.last_seen.is_some());
}

#[tokio::test]
async fn test_health_reports_online_sessions() {
    let server = TestServer::start().await;
    let _alice = server.connect("alice").await;
    let _bob = server.connect("bob").await;

    let response = create_router(server.state.clone())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: HealthStatus = serde_json::from_slice(&body).unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.online, 2);
}
