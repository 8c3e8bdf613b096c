// ============================
// crates/backend-lib/src/session.rs
// ============================
//! Per-socket session: identity, bounded outbound queue and close signal.
//!
//! A session is shared (`Arc`) between the hub, the dispatcher and its two
//! pumps. Producers never block: a full queue is reported as a failed send.
use std::fmt;
use std::sync::Arc;

use chatwire_common::ServerFrame;
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::{mpsc, mpsc::error::TrySendError, watch};
use uuid::Uuid;

use crate::metrics::OUTBOUND_DROPPED;

/// A serialised server frame, shared between recipients of a fan-out
#[derive(Clone, PartialEq, Eq)]
pub struct Payload(Arc<str>);

impl Payload {
    pub fn encode(frame: &ServerFrame) -> Result<Self, serde_json::Error> {
        Ok(Self(serde_json::to_string(frame)?.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the payload back into a frame
    pub fn decode(&self) -> Result<ServerFrame, serde_json::Error> {
        serde_json::from_str(&self.0)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&&*self.0).finish()
    }
}

pub struct Session {
    id: Uuid,
    user_id: String,
    /// `None` once the queue has been closed
    outbound: Mutex<Option<mpsc::Sender<Payload>>>,
    shutdown: watch::Sender<bool>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closing", &self.is_closing())
            .finish()
    }
}

impl Session {
    /// Create a session and the receiving end of its outbound queue, which
    /// belongs to the write pump.
    pub fn new(
        user_id: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown, _) = watch::channel(false);
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            outbound: Mutex::new(Some(tx)),
            shutdown,
        });
        (session, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Non-blocking enqueue. Returns false when the queue is full or closed.
    pub fn try_send(&self, payload: Payload) -> bool {
        let guard = self.outbound.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                counter!(OUTBOUND_DROPPED).increment(1);
                tracing::warn!(
                    user_id = %self.user_id,
                    session_id = %self.id,
                    "outbound queue full, dropping frame"
                );
                false
            },
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Encode and enqueue a frame for this session's own socket
    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        match Payload::encode(frame) {
            Ok(payload) => self.try_send(payload),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode server frame");
                false
            },
        }
    }

    /// Close the outbound queue; the write pump drains what is left, sends a
    /// close frame and exits.
    pub fn close_queue(&self) {
        self.outbound.lock().take();
    }

    /// Ask both pumps to stop, closing the socket
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_closing(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once [`Session::close`] has been called
    pub async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|closing| *closing).await;
    }
}
