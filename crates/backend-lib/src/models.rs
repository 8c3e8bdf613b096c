// ================
// crates/backend-lib/src/models.rs
// ================
//! Logical records seen through the persistence gateway.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use chatwire_common::MessageStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            phone: None,
            role: Role::User,
            last_seen: None,
        }
    }
}

/// A persisted chat message.
///
/// Exactly one of `recipient_id` / `group_id` is set. `deleted_at` is a
/// terminal soft delete: once set, content no longer changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub group_id: Option<String>,
    pub content: String,
    pub media_id: Option<String>,
    pub reply_to_id: Option<String>,
    pub forwarded_from: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: MessageStatus,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether `user_id` sent or directly received this message.
    pub fn is_direct_participant(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.recipient_id.as_deref() == Some(user_id)
    }
}

/// Input for [`crate::storage::Storage::create_message`]. The store assigns
/// `id` when absent, stamps `created_at` and starts in `status`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewMessage {
    pub id: Option<String>,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub group_id: Option<String>,
    pub content: String,
    pub media_id: Option<String>,
    pub reply_to_id: Option<String>,
    pub forwarded_from: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: Option<MessageStatus>,
}

impl NewMessage {
    pub fn direct(sender_id: &str, recipient_id: &str, content: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            recipient_id: Some(recipient_id.to_string()),
            content: content.to_string(),
            ..Self::default()
        }
    }

    pub fn group(sender_id: &str, group_id: &str, content: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            group_id: Some(group_id.to_string()),
            content: content.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub id: String,
    pub uploader_id: String,
    pub status: MediaStatus,
}

/// "Hide from this user only"; never removes the message itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeletion {
    pub message_id: String,
    pub user_id: String,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    pub blocker_id: String,
    pub blocked_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Owner,
    Admin,
    #[default]
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub group_id: String,
    pub user_id: String,
    #[serde(default)]
    pub role: GroupRole,
    pub joined_at: DateTime<Utc>,
}

/// The other side of a conversation, from one user's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Conversation {
    Direct(String),
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSettings {
    pub user_id: String,
    pub conversation: Conversation,
    /// Disappearing-message TTL in seconds, 0 = off
    #[serde(default)]
    pub disappearing_seconds: u32,
    #[serde(default)]
    pub muted_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceToken {
    pub user_id: String,
    pub token: String,
    pub platform: Platform,
}

/// One user's reaction on a message; unique per (message_id, user_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// `owner_id` keeps `contact_id` in their contact list and therefore sees
/// `contact_id`'s presence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    pub owner_id: String,
    pub contact_id: String,
}
