// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
//! HTTP surface: the socket upgrade endpoint and a health probe.
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::metrics::{WS_CONNECTION, WS_REJECTED};
use crate::websocket::serve_socket;
use crate::AppState;

/// Query string of the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
    pub online: usize,
}

/// Create the router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Upgrade handler. The bearer token comes from `?token=`; without a valid
/// one the socket is closed straight after the upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    counter!(WS_CONNECTION).increment(1);

    let max_frame_bytes = state.settings.realtime.max_frame_bytes;
    let ws = ws
        .max_message_size(max_frame_bytes)
        .max_frame_size(max_frame_bytes);

    let identity = match params.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => state.auth.verify(token).await,
        None => None,
    };

    match identity {
        Some(identity) => {
            tracing::debug!(user_id = %identity.user_id, "socket authenticated");
            ws.on_upgrade(move |socket| serve_socket(socket, identity, state))
        },
        None => {
            counter!(WS_REJECTED).increment(1);
            tracing::info!("rejecting socket without a valid token");
            ws.on_upgrade(reject_socket)
        },
    }
}

async fn reject_socket(mut socket: WebSocket) {
    let _ = socket.send(Message::Close(None)).await;
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthStatus {
        status: "ok".to_string(),
        online: state.hub.online_count(),
    })
}
