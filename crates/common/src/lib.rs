// ================
// common/src/lib.rs
// ================
//! Wire protocol shared by the chatwire server and its clients.
//!
//! Every frame on the socket is a UTF-8 JSON object carrying a `type` tag.
//! [`ClientFrame`] lists what a client may send, [`ServerFrame`] what the
//! server pushes back. Timestamps serialise as RFC-3339 strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tags a client is allowed to send.
pub const CLIENT_FRAME_TYPES: [&str; 6] = [
    "message",
    "typing",
    "ack",
    "message_edit",
    "message_delete",
    "reaction",
];

/// Delivery status of a persisted message.
///
/// The ordering is meaningful: a message only ever moves forward along
/// `Sent < Delivered < Read`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }
}

/// Who a `message_delete` applies to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    /// Hide the message from the requesting user only
    Me,
    /// Soft-delete the message for every participant (sender only)
    Everyone,
}

/// Requested reaction change.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Add,
    Remove,
}

/// Reaction change as reported to participants.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReactionOutcome {
    Added,
    Removed,
}

/// Body of a client `message` frame.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ChatMessage {
    /// Direct recipient user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Target group id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Client-side correlation id, echoed on the sender's ack
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl ChatMessage {
    /// Direct recipient, with empty strings treated as absent.
    pub fn recipient(&self) -> Option<&str> {
        non_empty(&self.to)
    }

    /// Target group, with empty strings treated as absent.
    pub fn group(&self) -> Option<&str> {
        non_empty(&self.group_id)
    }

    pub fn media(&self) -> Option<&str> {
        non_empty(&self.media_id)
    }

    pub fn reply_target(&self) -> Option<&str> {
        non_empty(&self.reply_to_id)
    }
}

/// Returns the contained string unless it is missing or empty.
pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Frames sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Submit a chat message to a user or a group
    Message(ChatMessage),
    /// Ephemeral typing indicator
    /// # Fields
    /// * `to` - Direct peer (ignored when `group_id` is set)
    /// * `group_id` - Group the user is typing in
    /// * `typing` - Whether the user started or stopped typing
    Typing {
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        group_id: Option<String>,
        typing: bool,
    },
    /// Receipt for a message; only `read` has an effect
    Ack {
        message_id: String,
        status: MessageStatus,
    },
    /// Replace the content of one's own message
    MessageEdit {
        message_id: String,
        content: String,
    },
    /// Delete a message for oneself or for everyone
    MessageDelete {
        message_id: String,
        delete_for: DeleteScope,
    },
    /// Add or remove the caller's reaction on a message
    Reaction {
        message_id: String,
        action: ReactionAction,
        #[serde(default)]
        emoji: Option<String>,
    },
}

/// Why an inbound frame could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid message format: {0}")]
    Malformed(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

impl ClientFrame {
    /// Decode a text frame, telling unknown tags apart from malformed bodies.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let tag = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| DecodeError::Malformed("missing `type` field".to_string()))?;

        if !CLIENT_FRAME_TYPES.contains(&tag) {
            return Err(DecodeError::UnknownType(tag.to_string()));
        }

        serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    /// The frame's wire tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Message(_) => "message",
            ClientFrame::Typing { .. } => "typing",
            ClientFrame::Ack { .. } => "ack",
            ClientFrame::MessageEdit { .. } => "message_edit",
            ClientFrame::MessageDelete { .. } => "message_delete",
            ClientFrame::Reaction { .. } => "reaction",
        }
    }
}

/// Preview of the message being replied to
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReplyPreview {
    pub id: String,
    pub sender_id: String,
    pub content: String,
}

/// A persisted message as delivered to live recipients
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub id: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Per-emoji reaction tally
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    pub users: Vec<String>,
}

/// Frames sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A chat message for a live recipient
    Message(OutboundMessage),
    /// Delivery status of a message
    /// # Fields
    /// * `message_id` - Persisted message id
    /// * `status` - `sent`, `delivered` or `read`
    /// * `client_id` - Correlation id supplied by the sender, if any
    /// * `from` - Reader of the message, on `read` receipts
    /// * `created_at` - Persistence timestamp, on the sender's first ack
    Ack {
        message_id: String,
        status: MessageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        created_at: Option<DateTime<Utc>>,
    },
    /// Typing indicator relayed from a peer
    Typing {
        from: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
        typing: bool,
    },
    /// Online/offline change of a contact
    Presence {
        user_id: String,
        online: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen: Option<DateTime<Utc>>,
    },
    MessageEdited {
        message_id: String,
        content: String,
        edited_at: DateTime<Utc>,
    },
    MessageDeleted {
        message_id: String,
    },
    /// Reaction change with the recomputed tallies
    Reaction {
        message_id: String,
        user_id: String,
        emoji: String,
        action: ReactionOutcome,
        reactions: Vec<ReactionSummary>,
    },
    /// Per-frame failure; the connection stays open
    Error {
        error: String,
    },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            error: message.into(),
        }
    }
}
