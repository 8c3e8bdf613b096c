// ============================
// crates/backend-lib/src/hub.rs
// ============================
//! Presence hub: the process-wide map of user id to live session, and the
//! fan-out entry points built on it.
//!
//! The map sits behind one readers-writer lock. The write lock is taken only
//! to register or unregister; lookups and enqueues share the read lock and
//! never await while holding it.
use std::collections::HashMap;
use std::sync::Arc;

use chatwire_common::ServerFrame;
use chrono::Utc;
use metrics::{counter, gauge};
use parking_lot::RwLock;

use crate::metrics::{SESSION_EVICTED, WS_ACTIVE};
use crate::presence;
use crate::session::{Payload, Session};
use crate::storage::{Storage, StoreResult};

/// Outcome of a group fan-out
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GroupDelivery {
    /// Members whose session accepted the frame
    pub delivered: Vec<String>,
    /// Members with a live session whose queue refused the frame
    pub dropped: Vec<String>,
    /// Members with no live session
    pub offline: Vec<String>,
}

impl GroupDelivery {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    /// Members the live send did not reach, offline or queue-full
    pub fn missed(&self) -> impl Iterator<Item = &str> {
        self.offline.iter().chain(&self.dropped).map(String::as_str)
    }
}

pub struct Hub {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    storage: Arc<dyn Storage>,
}

impl Hub {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            storage,
        }
    }

    pub(crate) fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Install `session` as the live session for its user. A previous
    /// session for the same user is closed; its own later `unregister`
    /// becomes a no-op.
    pub async fn register(&self, session: Arc<Session>) {
        let previous = {
            let mut sessions = self.sessions.write();
            let previous = sessions.insert(session.user_id().to_string(), session.clone());
            gauge!(WS_ACTIVE).set(sessions.len() as f64);
            previous
        };

        if let Some(previous) = previous.filter(|prev| !Arc::ptr_eq(prev, &session)) {
            counter!(SESSION_EVICTED).increment(1);
            tracing::info!(
                user_id = %session.user_id(),
                old_session = %previous.id(),
                new_session = %session.id(),
                "replacing existing session"
            );
            previous.close();
        }

        tracing::debug!(user_id = %session.user_id(), session_id = %session.id(), "session registered");
        presence::announce_online(self, session.user_id()).await;
    }

    /// Remove `session` if it is still the mapped one. The session's queue is
    /// closed either way. Returns whether the mapping was removed.
    pub async fn unregister(&self, session: &Arc<Session>) -> bool {
        let removed = {
            let mut sessions = self.sessions.write();
            let is_current = sessions
                .get(session.user_id())
                .is_some_and(|current| Arc::ptr_eq(current, session));
            if is_current {
                sessions.remove(session.user_id());
                gauge!(WS_ACTIVE).set(sessions.len() as f64);
            }
            is_current
        };

        session.close_queue();

        if !removed {
            tracing::debug!(
                user_id = %session.user_id(),
                session_id = %session.id(),
                "stale session unregistered, mapping left untouched"
            );
            return false;
        }

        let last_seen = Utc::now();
        if let Err(e) = self.storage.stamp_last_seen(session.user_id(), last_seen).await {
            tracing::warn!(user_id = %session.user_id(), error = %e, "failed to stamp last_seen");
        }
        tracing::debug!(user_id = %session.user_id(), session_id = %session.id(), "session unregistered");
        presence::announce_offline(self, session.user_id(), last_seen).await;
        true
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.sessions.read().contains_key(user_id)
    }

    pub fn online_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// The live session for `user_id`, if any
    pub fn session(&self, user_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(user_id).cloned()
    }

    /// Non-blocking enqueue on the user's session. False when the user has
    /// no session or its queue is full.
    pub fn send_to_user(&self, user_id: &str, payload: &Payload) -> bool {
        let sessions = self.sessions.read();
        sessions
            .get(user_id)
            .is_some_and(|session| session.try_send(payload.clone()))
    }

    /// Encode once and enqueue for `user_id`
    pub fn send_frame_to_user(&self, user_id: &str, frame: &ServerFrame) -> bool {
        match Payload::encode(frame) {
            Ok(payload) => self.send_to_user(user_id, &payload),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode server frame");
                false
            },
        }
    }

    /// Offer `payload` to every member of the group except `exclude_user_id`.
    /// Delivered, dropped and offline members come from one snapshot of the
    /// session map, so every member lands in exactly one of them.
    pub async fn send_to_group(
        &self,
        group_id: &str,
        exclude_user_id: &str,
        payload: &Payload,
    ) -> StoreResult<GroupDelivery> {
        let members = self.storage.list_group_member_ids(group_id).await?;

        let mut outcome = GroupDelivery::default();
        let sessions = self.sessions.read();
        for member in members.into_iter().filter(|m| m != exclude_user_id) {
            let Some(session) = sessions.get(&member) else {
                outcome.offline.push(member);
                continue;
            };
            if session.try_send(payload.clone()) {
                outcome.delivered.push(member);
            } else {
                outcome.dropped.push(member);
            }
        }
        Ok(outcome)
    }

    /// Members of the group, other than `exclude_user_id`, with no live session
    pub async fn offline_group_members(
        &self,
        group_id: &str,
        exclude_user_id: &str,
    ) -> StoreResult<Vec<String>> {
        let members = self.storage.list_group_member_ids(group_id).await?;
        let sessions = self.sessions.read();
        Ok(members
            .into_iter()
            .filter(|m| m != exclude_user_id && !sessions.contains_key(m))
            .collect())
    }
}
