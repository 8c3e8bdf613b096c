// ============================
// crates/backend-lib/src/dispatcher/receipts.rs
// ============================
//! Ephemeral signals: typing indicators and read receipts.
use chatwire_common::{non_empty, MessageStatus, ServerFrame};

use super::{encode, Dispatcher};
use crate::error::AppError;
use crate::session::Session;
use crate::validation::ValidationError;

impl Dispatcher {
    /// Typing indicators are never persisted nor acked. Group typing skips
    /// the block filter; direct typing drops silently across a block pair.
    pub(super) async fn handle_typing(
        &self,
        session: &Session,
        to: Option<String>,
        group_id: Option<String>,
        typing: bool,
    ) -> Result<(), AppError> {
        let from = session.user_id();

        if let Some(group_id) = non_empty(&group_id) {
            self.require_group_member(group_id, from).await?;
            let payload = encode(&ServerFrame::Typing {
                from: from.to_string(),
                group_id: Some(group_id.to_string()),
                typing,
            })?;
            self.hub.send_to_group(group_id, from, &payload).await?;
            return Ok(());
        }

        let to = non_empty(&to).ok_or(ValidationError::MissingField("to or group_id"))?;
        if self.storage.is_either_blocked(from, to).await? {
            tracing::trace!(from, to, "typing dropped across block pair");
            return Ok(());
        }
        self.hub.send_frame_to_user(
            to,
            &ServerFrame::Typing {
                from: from.to_string(),
                group_id: None,
                typing,
            },
        );
        Ok(())
    }

    /// Only `read` receipts from the message's direct recipient change
    /// anything; the sender is then told who read it.
    pub(super) async fn handle_ack(
        &self,
        session: &Session,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<(), AppError> {
        if status != MessageStatus::Read {
            tracing::trace!(message_id, status = status.as_str(), "ignoring non-read ack");
            return Ok(());
        }

        let reader = session.user_id();
        let message = self.load_message(message_id).await?;
        if message.recipient_id.as_deref() != Some(reader) {
            tracing::debug!(message_id, reader, "read receipt from non-recipient ignored");
            return Ok(());
        }

        self.storage
            .update_message_status(message_id, MessageStatus::Read)
            .await?;

        self.hub.send_frame_to_user(
            &message.sender_id,
            &ServerFrame::Ack {
                message_id: message_id.to_string(),
                status: MessageStatus::Read,
                client_id: None,
                from: Some(reader.to_string()),
                created_at: None,
            },
        );
        Ok(())
    }
}
