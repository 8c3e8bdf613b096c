// ==================
// crates/backend-lib/src/websocket.rs
// ==================
//! Session I/O.
//!
//! Each authenticated socket gets a [`Session`] and two pumps:
//!
//! - the read pump decodes inbound text frames and hands them to the
//!   dispatcher. Its deadline is refreshed only by pongs; a read error, an
//!   oversized frame or a missed deadline ends the session.
//! - the write pump drains the outbound queue, pings every `ping_period`
//!   and bounds every write by `write_wait`. A closed queue or a close
//!   signal makes it send a close frame and exit.
//!
//! When the read pump exits the session is unregistered, which closes the
//! queue and lets the write pump finish.
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use chatwire_common::ServerFrame;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::auth::Identity;
use crate::config::RealtimeSettings;
use crate::dispatcher::Dispatcher;
use crate::error::AppError;
use crate::session::{Payload, Session};
use crate::AppState;

/// Run one authenticated socket until either side goes away
pub async fn serve_socket(socket: WebSocket, identity: Identity, state: AppState) {
    let realtime = state.settings.realtime.clone();
    let (session, outbound) = Session::new(identity.user_id, realtime.outbound_queue_capacity);
    tracing::info!(
        user_id = %session.user_id(),
        username = %identity.username,
        session_id = %session.id(),
        "session opened"
    );

    let (sink, stream) = socket.split();
    state.hub.register(session.clone()).await;

    let mut writer = tokio::spawn(write_pump(sink, session.clone(), outbound, realtime.clone()));
    read_pump(stream, &session, &state.dispatcher, realtime.pong_wait()).await;

    state.hub.unregister(&session).await;
    if tokio::time::timeout(realtime.write_wait(), &mut writer).await.is_err() {
        tracing::warn!(session_id = %session.id(), "write pump did not stop in time");
        writer.abort();
    }
    tracing::info!(user_id = %session.user_id(), session_id = %session.id(), "session closed");
}

async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    session: &Arc<Session>,
    dispatcher: &Dispatcher,
    pong_wait: Duration,
) {
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let next = tokio::select! {
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
            () = session.closed() => {
                tracing::debug!(session_id = %session.id(), "read pump stopped by close signal");
                break;
            },
        };

        let message = match next {
            Err(_) => {
                tracing::debug!(session_id = %session.id(), "read deadline exceeded");
                break;
            },
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                // includes frames over the size cap
                tracing::debug!(session_id = %session.id(), error = %e, "socket read failed");
                break;
            },
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                if let Err(e) = dispatcher.handle_text(session, text.as_str()).await {
                    tracing::warn!(session_id = %session.id(), error = %e, "dispatch ended session");
                    break;
                }
            },
            Message::Pong(_) => deadline = Instant::now() + pong_wait,
            Message::Close(_) => break,
            Message::Binary(_) => {
                session.send_frame(&ServerFrame::error("Binary frames are not supported"));
            },
            // answered by the websocket layer
            Message::Ping(_) => {},
        }
    }
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    session: Arc<Session>,
    mut outbound: mpsc::Receiver<Payload>,
    realtime: RealtimeSettings,
) {
    let write_wait = realtime.write_wait();
    let ping_period = realtime.ping_period();
    let mut ping = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(payload) => {
                    let frame = Message::Text(payload.as_str().to_owned().into());
                    if let Err(e) = write(&mut sink, frame, write_wait).await {
                        tracing::debug!(session_id = %session.id(), error = %e, "write failed");
                        break;
                    }
                },
                None => {
                    let _ = write(&mut sink, Message::Close(None), write_wait).await;
                    break;
                },
            },
            _ = ping.tick() => {
                if let Err(e) = write(&mut sink, Message::Ping(Bytes::new()), write_wait).await {
                    tracing::debug!(session_id = %session.id(), error = %e, "ping failed");
                    break;
                }
            },
            () = session.closed() => {
                let _ = write(&mut sink, Message::Close(None), write_wait).await;
                break;
            },
        }
    }

    // a dead writer must take the reader down with it
    session.close();
}

async fn write(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<(), AppError> {
    match tokio::time::timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AppError::Transport(e.to_string())),
        Err(_) => Err(AppError::Transport("write deadline exceeded".to_string())),
    }
}
