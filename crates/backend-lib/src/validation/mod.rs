// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Frame validation module.
//!
//! Checks field shapes before a frame reaches the dispatcher. Business rules
//! that need the store (membership, blocks, ownership) live in the
//! dispatcher itself.

use chatwire_common::{non_empty, ChatMessage, ClientFrame, ReactionAction};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

const MAX_ID_LENGTH: usize = 64;
pub const MAX_CONTENT_CHARS: usize = 10_000;
const MAX_EMOJI_BYTES: usize = 32;

static ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));

/// Possible validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid {field}: {reason}")]
    InvalidId { field: &'static str, reason: String },

    #[error("Message must target exactly one of a user or a group")]
    AmbiguousTarget,

    #[error("Message must have content or media")]
    EmptyMessage,

    #[error("Content exceeds {MAX_CONTENT_CHARS} characters")]
    ContentTooLong,

    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    #[error("Invalid emoji: {0}")]
    InvalidEmoji(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate an opaque identifier
pub fn validate_id<'a>(field: &'static str, id: &'a str) -> ValidationResult<&'a str> {
    if id.is_empty() {
        return Err(ValidationError::InvalidId {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(ValidationError::InvalidId {
            field,
            reason: format!("must be at most {MAX_ID_LENGTH} characters"),
        });
    }
    if !ID_REGEX.is_match(id) {
        return Err(ValidationError::InvalidId {
            field,
            reason: "must contain only letters, digits, '-' and '_'".to_string(),
        });
    }
    Ok(id)
}

fn validate_optional_id(field: &'static str, id: &Option<String>) -> ValidationResult<()> {
    if let Some(id) = non_empty(id) {
        validate_id(field, id)?;
    }
    Ok(())
}

/// Validate message content length (counted in characters, not bytes)
pub fn validate_content(content: &str) -> ValidationResult<&str> {
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ValidationError::ContentTooLong);
    }
    Ok(content)
}

pub fn validate_emoji(emoji: &str) -> ValidationResult<&str> {
    if emoji.trim().is_empty() {
        return Err(ValidationError::InvalidEmoji("must not be empty".to_string()));
    }
    if emoji.len() > MAX_EMOJI_BYTES {
        return Err(ValidationError::InvalidEmoji(format!(
            "must be at most {MAX_EMOJI_BYTES} bytes"
        )));
    }
    Ok(emoji)
}

/// Validate a latitude/longitude pair
pub fn validate_location(latitude: Option<f64>, longitude: Option<f64>) -> ValidationResult<()> {
    match (latitude, longitude) {
        (None, None) => Ok(()),
        (Some(lat), Some(lng)) => {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(ValidationError::InvalidLocation(
                    "latitude must be between -90 and 90".to_string(),
                ));
            }
            if !(-180.0..=180.0).contains(&lng) {
                return Err(ValidationError::InvalidLocation(
                    "longitude must be between -180 and 180".to_string(),
                ));
            }
            Ok(())
        },
        _ => Err(ValidationError::InvalidLocation(
            "latitude and longitude must be provided together".to_string(),
        )),
    }
}

/// Shape checks for a chat message: exactly one target, some payload.
pub fn validate_chat_message(msg: &ChatMessage) -> ValidationResult<()> {
    match (msg.recipient(), msg.group()) {
        (Some(to), None) => {
            validate_id("recipient", to)?;
        },
        (None, Some(group_id)) => {
            validate_id("group_id", group_id)?;
        },
        _ => return Err(ValidationError::AmbiguousTarget),
    }

    if msg.content.is_empty() && msg.media().is_none() {
        return Err(ValidationError::EmptyMessage);
    }
    validate_content(&msg.content)?;
    validate_optional_id("media_id", &msg.media_id)?;
    validate_optional_id("reply_to_id", &msg.reply_to_id)?;
    validate_location(msg.latitude, msg.longitude)
}

/// Validate a decoded client frame
pub fn validate_client_frame(frame: &ClientFrame) -> ValidationResult<()> {
    match frame {
        ClientFrame::Message(msg) => validate_chat_message(msg),
        ClientFrame::Typing { to, group_id, .. } => {
            if let Some(group_id) = non_empty(group_id) {
                validate_id("group_id", group_id)?;
            } else if let Some(to) = non_empty(to) {
                validate_id("recipient", to)?;
            } else {
                return Err(ValidationError::MissingField("to or group_id"));
            }
            Ok(())
        },
        ClientFrame::Ack { message_id, .. } => validate_id("message_id", message_id).map(|_| ()),
        ClientFrame::MessageEdit {
            message_id,
            content,
        } => {
            validate_id("message_id", message_id)?;
            if content.is_empty() {
                return Err(ValidationError::MissingField("content"));
            }
            validate_content(content).map(|_| ())
        },
        ClientFrame::MessageDelete { message_id, .. } => {
            validate_id("message_id", message_id).map(|_| ())
        },
        ClientFrame::Reaction {
            message_id,
            action,
            emoji,
        } => {
            validate_id("message_id", message_id)?;
            if *action == ReactionAction::Add {
                let emoji = non_empty(emoji).ok_or(ValidationError::MissingField("emoji"))?;
                validate_emoji(emoji)?;
            }
            Ok(())
        },
    }
}
