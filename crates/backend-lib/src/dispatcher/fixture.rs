// ============================
// crates/backend-lib/src/dispatcher/fixture.rs
// ============================
//! Shared setup for dispatcher tests: a seeded in-memory store, a hub, and a
//! push gateway that records every notice.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatwire_common::ServerFrame;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};

use super::Dispatcher;
use crate::bot::HelpBot;
use crate::hub::Hub;
use crate::models::{GroupMember, GroupRole, User};
use crate::push::{OfflineNotice, PushError, PushGateway};
use crate::session::{Payload, Session};
use crate::storage::MemoryStorage;

struct RecordingPush(mpsc::UnboundedSender<OfflineNotice>);

#[async_trait]
impl PushGateway for RecordingPush {
    async fn notify_offline(&self, notice: OfflineNotice) -> Result<usize, PushError> {
        let _ = self.0.send(notice);
        Ok(1)
    }
}

pub(super) struct Client {
    pub session: Arc<Session>,
    rx: mpsc::Receiver<Payload>,
}

impl Client {
    /// Everything queued so far
    pub fn frames(&mut self) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(payload) = self.rx.try_recv() {
            frames.push(payload.decode().expect("valid server frame"));
        }
        frames
    }

    pub fn next_frame(&mut self) -> ServerFrame {
        let payload = self.rx.try_recv().expect("a queued frame");
        payload.decode().expect("valid server frame")
    }

    pub fn next_frame_skipping_acks(&mut self) -> ServerFrame {
        loop {
            match self.next_frame() {
                ServerFrame::Ack { .. } => continue,
                frame => return frame,
            }
        }
    }
}

/// alice, bob, carol and dave exist; alice, bob and carol are in `g1`.
pub(super) struct Fixture {
    pub storage: Arc<MemoryStorage>,
    pub hub: Arc<Hub>,
    pub dispatcher: Dispatcher,
    pushes: Mutex<mpsc::UnboundedReceiver<OfflineNotice>>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_bot(bot_user_id: &str) -> Self {
        Self::build(Some(bot_user_id))
    }

    fn build(bot_user_id: Option<&str>) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        for (id, name) in [("alice", "Alice"), ("bob", "Bob"), ("carol", "Carol"), ("dave", "Dave")] {
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

        let hub = Arc::new(Hub::new(storage.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut dispatcher = Dispatcher::new(storage.clone(), hub.clone(), Arc::new(RecordingPush(tx)));
        if let Some(bot_user_id) = bot_user_id {
            dispatcher = dispatcher.with_bot(bot_user_id, Arc::new(HelpBot));
        }

        Self {
            storage,
            hub,
            dispatcher,
            pushes: Mutex::new(rx),
        }
    }

    pub async fn connect(&self, user_id: &str) -> Client {
        self.connect_with_capacity(user_id, 16).await
    }

    pub async fn connect_with_capacity(&self, user_id: &str, capacity: usize) -> Client {
        let (session, rx) = Session::new(user_id, capacity);
        self.hub.register(session.clone()).await;
        Client { session, rx }
    }

    pub async fn send(&self, client: &Client, text: &str) {
        self.dispatcher
            .handle_text(&client.session, text)
            .await
            .expect("no transport error");
    }

    pub async fn next_push(&self) -> Option<OfflineNotice> {
        let mut pushes = self.pushes.lock().await;
        tokio::time::timeout(Duration::from_secs(1), pushes.recv())
            .await
            .ok()
            .flatten()
    }

    /// True when no push arrives within a short grace period
    pub async fn no_push(&self) -> bool {
        let mut pushes = self.pushes.lock().await;
        tokio::time::timeout(Duration::from_millis(50), pushes.recv())
            .await
            .is_err()
    }
}
