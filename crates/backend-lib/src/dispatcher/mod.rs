// ============================
// crates/backend-lib/src/dispatcher/mod.rs
// ============================
//! Message dispatcher.
//!
//! Every inbound frame goes through three phases: validate, persist, fan out.
//! Recoverable failures are turned into an `error` frame on the sender's own
//! queue; only transport errors are handed back to the pumps.
use std::sync::Arc;

use chatwire_common::{ClientFrame, ServerFrame};
use metrics::counter;

use crate::bot::BotResponder;
use crate::error::AppError;
use crate::hub::Hub;
use crate::metrics::FRAME_REJECTED;
use crate::models::Message;
use crate::push::PushGateway;
use crate::session::{Payload, Session};
use crate::storage::Storage;
use crate::validation::validate_client_frame;

mod chat;
mod mutations;
mod reactions;
mod receipts;

#[cfg(test)]
mod fixture;

pub use reactions::summarize_reactions;

const DEFAULT_PREVIEW_CHARS: usize = 100;

struct BotRoute {
    user_id: String,
    responder: Arc<dyn BotResponder>,
}

pub struct Dispatcher {
    storage: Arc<dyn Storage>,
    hub: Arc<Hub>,
    push: Arc<dyn PushGateway>,
    bot: Option<BotRoute>,
    preview_chars: usize,
}

impl Dispatcher {
    pub fn new(storage: Arc<dyn Storage>, hub: Arc<Hub>, push: Arc<dyn PushGateway>) -> Self {
        Self {
            storage,
            hub,
            push,
            bot: None,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }

    /// Route direct messages for `user_id` to `responder`
    pub fn with_bot(mut self, user_id: impl Into<String>, responder: Arc<dyn BotResponder>) -> Self {
        self.bot = Some(BotRoute {
            user_id: user_id.into(),
            responder,
        });
        self
    }

    /// Characters of content carried in push previews
    pub fn with_preview_chars(mut self, preview_chars: usize) -> Self {
        self.preview_chars = preview_chars;
        self
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Decode and handle one text frame. Failures are reported to the
    /// session as an `error` frame; only transport errors are returned.
    pub async fn handle_text(&self, session: &Arc<Session>, text: &str) -> Result<(), AppError> {
        let result = match ClientFrame::decode(text) {
            Ok(frame) => self.handle(session, frame).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Err(err) if err.is_transport() => Err(err),
            Err(err) => {
                self.reject(session, &err);
                Ok(())
            },
            Ok(()) => Ok(()),
        }
    }

    /// Validate and handle a decoded frame
    #[tracing::instrument(skip_all, fields(user_id = %session.user_id(), kind = frame.kind()))]
    pub async fn handle(&self, session: &Arc<Session>, frame: ClientFrame) -> Result<(), AppError> {
        validate_client_frame(&frame)?;

        match frame {
            ClientFrame::Message(msg) => self.handle_chat(session, msg).await,
            ClientFrame::Typing {
                to,
                group_id,
                typing,
            } => self.handle_typing(session, to, group_id, typing).await,
            ClientFrame::Ack { message_id, status } => {
                self.handle_ack(session, &message_id, status).await
            },
            ClientFrame::MessageEdit {
                message_id,
                content,
            } => self.handle_edit(session, &message_id, content).await,
            ClientFrame::MessageDelete {
                message_id,
                delete_for,
            } => self.handle_delete(session, &message_id, delete_for).await,
            ClientFrame::Reaction {
                message_id,
                action,
                emoji,
            } => self.handle_reaction(session, &message_id, action, emoji).await,
        }
    }

    fn reject(&self, session: &Session, err: &AppError) {
        counter!(FRAME_REJECTED, "code" => err.error_code()).increment(1);
        match err {
            AppError::Persistence(e) => tracing::error!(
                user_id = %session.user_id(),
                code = err.error_code(),
                error = %e,
                "frame failed on storage"
            ),
            _ => tracing::debug!(
                user_id = %session.user_id(),
                code = err.error_code(),
                error = %err,
                "frame rejected"
            ),
        }
        reply(session, &ServerFrame::error(err.client_message()));
    }

    async fn load_message(&self, message_id: &str) -> Result<Message, AppError> {
        self.storage
            .get_message(message_id)
            .await
            .map_err(|e| AppError::from_lookup(e, "Message"))
    }

    async fn require_group_member(&self, group_id: &str, user_id: &str) -> Result<(), AppError> {
        if self.storage.is_group_member(group_id, user_id).await? {
            Ok(())
        } else {
            Err(AppError::Unauthorized("Not a member of this group".to_string()))
        }
    }

    /// Whether `user_id` belongs to the conversation `message` lives in
    async fn is_participant(&self, message: &Message, user_id: &str) -> Result<bool, AppError> {
        match &message.group_id {
            Some(group_id) => Ok(self.storage.is_group_member(group_id, user_id).await?),
            None => Ok(message.is_direct_participant(user_id)),
        }
    }

    /// Send `frame` to the acting session and to the rest of the message's
    /// conversation: the other party of a direct message, or every other
    /// group member.
    async fn notify_conversation(
        &self,
        session: &Session,
        message: &Message,
        frame: &ServerFrame,
    ) -> Result<(), AppError> {
        let payload = encode(frame)?;
        if !session.try_send(payload.clone()) {
            tracing::debug!(user_id = %session.user_id(), "own session did not accept update");
        }

        let actor = session.user_id();
        match (&message.group_id, &message.recipient_id) {
            (Some(group_id), _) => {
                self.hub.send_to_group(group_id, actor, &payload).await?;
            },
            (None, Some(recipient_id)) => {
                let counterparty = if message.sender_id == actor {
                    recipient_id
                } else {
                    &message.sender_id
                };
                if counterparty != actor {
                    self.hub.send_to_user(counterparty, &payload);
                }
            },
            (None, None) => {
                tracing::warn!(message_id = %message.id, "message has no conversation target");
            },
        }
        Ok(())
    }
}

/// Enqueue a frame on the acting session
fn reply(session: &Session, frame: &ServerFrame) {
    if !session.send_frame(frame) {
        tracing::debug!(
            user_id = %session.user_id(),
            session_id = %session.id(),
            "reply not queued"
        );
    }
}

fn encode(frame: &ServerFrame) -> Result<Payload, AppError> {
    Payload::encode(frame).map_err(|e| AppError::Transport(format!("failed to encode frame: {e}")))
}
