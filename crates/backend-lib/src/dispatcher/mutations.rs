// ============================
// crates/backend-lib/src/dispatcher/mutations.rs
// ============================
//! Edits and deletions of existing messages.
use chatwire_common::{DeleteScope, ServerFrame};
use chrono::Utc;

use super::{reply, Dispatcher};
use crate::error::AppError;
use crate::session::Session;

impl Dispatcher {
    pub(super) async fn handle_edit(
        &self,
        session: &Session,
        message_id: &str,
        content: String,
    ) -> Result<(), AppError> {
        let message = self.load_message(message_id).await?;
        if message.sender_id != session.user_id() {
            return Err(AppError::Unauthorized(
                "Cannot edit another user's message".to_string(),
            ));
        }
        if message.is_deleted() {
            return Err(AppError::Unauthorized(
                "Cannot edit a deleted message".to_string(),
            ));
        }

        let edited_at = Utc::now();
        self.storage
            .update_message_content(message_id, &content, edited_at)
            .await?;
        tracing::debug!(message_id, "message edited");

        let frame = ServerFrame::MessageEdited {
            message_id: message_id.to_string(),
            content,
            edited_at,
        };
        self.notify_conversation(session, &message, &frame).await
    }

    pub(super) async fn handle_delete(
        &self,
        session: &Session,
        message_id: &str,
        scope: DeleteScope,
    ) -> Result<(), AppError> {
        let message = self.load_message(message_id).await?;
        let user_id = session.user_id();
        let frame = ServerFrame::MessageDeleted {
            message_id: message_id.to_string(),
        };

        match scope {
            DeleteScope::Me => {
                if !self.is_participant(&message, user_id).await? {
                    return Err(AppError::Unauthorized(
                        "Not a participant in this conversation".to_string(),
                    ));
                }
                self.storage
                    .upsert_message_deletion(message_id, user_id)
                    .await?;
                reply(session, &frame);
                Ok(())
            },
            DeleteScope::Everyone => {
                if message.sender_id != user_id {
                    return Err(AppError::Unauthorized(
                        "Cannot delete another user's message".to_string(),
                    ));
                }
                self.storage
                    .soft_delete_message(message_id, Utc::now())
                    .await?;
                tracing::debug!(message_id, "message deleted for everyone");
                self.notify_conversation(session, &message, &frame).await
            },
        }
    }
}
