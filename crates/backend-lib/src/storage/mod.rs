// ============================
// crates/backend-lib/src/storage/mod.rs
// ============================
//! Persistence gateway: the record-level reads and writes the realtime core
//! needs, behind one trait so the store of record can be swapped out.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    Conversation, DeviceToken, Media, Message, MessageDeletion, MessageStatus, NewMessage,
    Reaction, User,
};

mod flat_file;
mod memory;

pub use flat_file::FlatFileStorage;
pub use memory::{Directory, MemoryStorage};

/// Storage failures, grouped by kind at the dispatcher boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    NotFound,
    Conflict,
    Invariant,
    Backend,
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::NotFound { .. } => StoreErrorKind::NotFound,
            StoreError::Conflict(_) => StoreErrorKind::Conflict,
            StoreError::Invariant(_) => StoreErrorKind::Invariant,
            StoreError::Io(_) | StoreError::Json(_) => StoreErrorKind::Backend,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == StoreErrorKind::NotFound
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Trait for storage backends
#[async_trait]
pub trait Storage: Send + Sync {
    /// Load a user record
    async fn get_user(&self, user_id: &str) -> StoreResult<User>;

    /// Load a message, including soft-deleted ones
    async fn get_message(&self, message_id: &str) -> StoreResult<Message>;

    async fn find_media(&self, media_id: &str) -> StoreResult<Media>;

    async fn is_group_member(&self, group_id: &str, user_id: &str) -> StoreResult<bool>;

    /// True when a block exists between `a` and `b` in either direction
    async fn is_either_blocked(&self, a: &str, b: &str) -> StoreResult<bool>;

    async fn list_group_member_ids(&self, group_id: &str) -> StoreResult<Vec<String>>;

    /// Users who should see `user_id`'s presence
    async fn list_contacts_of(&self, user_id: &str) -> StoreResult<Vec<String>>;

    /// Disappearing-message TTL `user_id` configured for a conversation, 0 = off
    async fn get_disappearing_seconds(
        &self,
        user_id: &str,
        conversation: &Conversation,
    ) -> StoreResult<u32>;

    async fn find_device_tokens(&self, user_id: &str) -> StoreResult<Vec<DeviceToken>>;

    /// Persist a new message and return the stored record
    async fn create_message(&self, message: NewMessage) -> StoreResult<Message>;

    /// Move a message forward along `sent < delivered < read`
    async fn update_message_status(&self, message_id: &str, status: MessageStatus)
        -> StoreResult<()>;

    async fn update_message_content(
        &self,
        message_id: &str,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn soft_delete_message(&self, message_id: &str, deleted_at: DateTime<Utc>)
        -> StoreResult<()>;

    /// Hide a message from one user; repeated calls keep the first row
    async fn upsert_message_deletion(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> StoreResult<MessageDeletion>;

    /// Set `user_id`'s reaction on a message, replacing any previous emoji
    async fn upsert_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> StoreResult<Reaction>;

    /// Remove `user_id`'s reaction; returns the removed row, if there was one
    async fn remove_reaction(&self, message_id: &str, user_id: &str)
        -> StoreResult<Option<Reaction>>;

    async fn list_reactions(&self, message_id: &str) -> StoreResult<Vec<Reaction>>;

    async fn stamp_last_seen(&self, user_id: &str, at: DateTime<Utc>) -> StoreResult<()>;
}
