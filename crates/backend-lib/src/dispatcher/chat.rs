// ============================
// crates/backend-lib/src/dispatcher/chat.rs
// ============================
//! `message` frames: direct, group and bot delivery.
use std::sync::Arc;

use chatwire_common::{ChatMessage, MessageStatus, OutboundMessage, ReplyPreview, ServerFrame};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;

use super::{encode, reply, BotRoute, Dispatcher};
use crate::error::AppError;
use crate::metrics::{MESSAGE_DELIVERED, MESSAGE_PERSISTED};
use crate::models::{Conversation, MediaStatus, Message, NewMessage};
use crate::push::{preview_text, spawn_offline_push, OfflineNotice};
use crate::session::Session;
use crate::validation::ValidationError;

impl Dispatcher {
    pub(super) async fn handle_chat(
        &self,
        session: &Arc<Session>,
        msg: ChatMessage,
    ) -> Result<(), AppError> {
        if let Some(media_id) = msg.media() {
            self.require_approved_media(media_id).await?;
        }

        match (msg.recipient(), msg.group()) {
            (Some(to), None) => {
                let to = to.to_string();
                match &self.bot {
                    Some(bot) if bot.user_id == to => self.bot_exchange(session, bot, msg).await,
                    _ => self.send_direct(session, &to, msg).await,
                }
            },
            (None, Some(group_id)) => {
                let group_id = group_id.to_string();
                self.send_group(session, &group_id, msg).await
            },
            _ => Err(ValidationError::AmbiguousTarget.into()),
        }
    }

    async fn require_approved_media(&self, media_id: &str) -> Result<(), AppError> {
        let media = self
            .storage
            .find_media(media_id)
            .await
            .map_err(|e| AppError::from_lookup(e, "Media"))?;
        if media.status != MediaStatus::Approved {
            return Err(AppError::MediaNotApproved);
        }
        Ok(())
    }

    async fn send_direct(
        &self,
        session: &Session,
        to: &str,
        msg: ChatMessage,
    ) -> Result<(), AppError> {
        let sender = session.user_id();
        self.storage
            .get_user(to)
            .await
            .map_err(|e| AppError::from_lookup(e, "User"))?;

        if self.storage.is_either_blocked(sender, to).await? {
            return Err(AppError::Forbidden(
                "Cannot send message to this user".to_string(),
            ));
        }

        let conversation = Conversation::Direct(to.to_string());
        let expires_at = self.expiry_for(sender, &conversation).await?;
        let client_id = msg.client_id.clone();
        let message = self
            .persist(new_message(sender, &conversation, msg, expires_at))
            .await?;

        let reply_to = self.reply_preview(&message, &conversation).await;
        let payload = encode(&ServerFrame::Message(outbound(&message, reply_to)))?;

        if self.hub.send_to_user(to, &payload) {
            counter!(MESSAGE_DELIVERED).increment(1);
            self.mark_delivered(&message.id).await;
            reply(session, &sent_ack(&message, MessageStatus::Delivered, client_id));
        } else {
            reply(session, &sent_ack(&message, MessageStatus::Sent, client_id));
            self.push_offline(&message, to, to, false);
        }
        Ok(())
    }

    async fn send_group(
        &self,
        session: &Session,
        group_id: &str,
        msg: ChatMessage,
    ) -> Result<(), AppError> {
        let sender = session.user_id();
        self.require_group_member(group_id, sender).await?;

        let conversation = Conversation::Group(group_id.to_string());
        let expires_at = self.expiry_for(sender, &conversation).await?;
        let client_id = msg.client_id.clone();
        let message = self
            .persist(new_message(sender, &conversation, msg, expires_at))
            .await?;

        let reply_to = self.reply_preview(&message, &conversation).await;
        let payload = encode(&ServerFrame::Message(outbound(&message, reply_to)))?;
        let delivery = self.hub.send_to_group(group_id, sender, &payload).await?;

        let status = if delivery.delivered_count() > 0 {
            counter!(MESSAGE_DELIVERED).increment(delivery.delivered_count() as u64);
            self.mark_delivered(&message.id).await;
            MessageStatus::Delivered
        } else {
            MessageStatus::Sent
        };
        reply(session, &sent_ack(&message, status, client_id));

        for member in delivery.missed() {
            self.push_offline(&message, member, group_id, true);
        }
        tracing::debug!(
            message_id = %message.id,
            group_id,
            delivered = delivery.delivered_count(),
            offline = delivery.offline.len(),
            dropped = delivery.dropped.len(),
            "group message fanned out"
        );
        Ok(())
    }

    /// Direct message to the reserved bot user: no block or TTL checks, the
    /// message counts as delivered and the bot's answer comes back as a
    /// direct message from the bot.
    async fn bot_exchange(
        &self,
        session: &Session,
        bot: &BotRoute,
        msg: ChatMessage,
    ) -> Result<(), AppError> {
        let sender = session.user_id();
        let client_id = msg.client_id.clone();
        let conversation = Conversation::Direct(bot.user_id.clone());
        let mut new = new_message(sender, &conversation, msg, None);
        new.status = Some(MessageStatus::Delivered);
        let message = self.persist(new).await?;
        reply(session, &sent_ack(&message, MessageStatus::Delivered, client_id));

        let Some(answer) = bot.responder.respond(sender, &message.content).await else {
            return Ok(());
        };
        let answer = self
            .persist(NewMessage::direct(&bot.user_id, sender, &answer))
            .await?;
        if session.send_frame(&ServerFrame::Message(outbound(&answer, None))) {
            self.mark_delivered(&answer.id).await;
        }
        Ok(())
    }

    async fn persist(&self, new: NewMessage) -> Result<Message, AppError> {
        let message = self.storage.create_message(new).await?;
        counter!(MESSAGE_PERSISTED).increment(1);
        tracing::debug!(message_id = %message.id, sender_id = %message.sender_id, "message persisted");
        Ok(message)
    }

    /// `now + ttl` when the sender turned on disappearing messages here
    async fn expiry_for(
        &self,
        sender: &str,
        conversation: &Conversation,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let seconds = self
            .storage
            .get_disappearing_seconds(sender, conversation)
            .await?;
        Ok((seconds > 0).then(|| Utc::now() + Duration::seconds(i64::from(seconds))))
    }

    /// Best-effort upgrade to `delivered` after a live enqueue. A concurrent
    /// read receipt may already have moved the message further.
    async fn mark_delivered(&self, message_id: &str) {
        if let Err(e) = self
            .storage
            .update_message_status(message_id, MessageStatus::Delivered)
            .await
        {
            tracing::debug!(message_id, error = %e, "status not upgraded to delivered");
        }
    }

    /// Preview of the replied-to message. Targets that are missing, deleted
    /// or from another conversation yield none.
    async fn reply_preview(
        &self,
        message: &Message,
        conversation: &Conversation,
    ) -> Option<ReplyPreview> {
        let target_id = message.reply_to_id.as_deref()?;
        let target = match self.storage.get_message(target_id).await {
            Ok(target) => target,
            Err(e) => {
                if !e.is_not_found() {
                    tracing::warn!(reply_to_id = target_id, error = %e, "reply target lookup failed");
                }
                return None;
            },
        };

        let same_conversation = match conversation {
            Conversation::Group(group_id) => target.group_id.as_deref() == Some(group_id.as_str()),
            Conversation::Direct(peer) => {
                target.group_id.is_none()
                    && target.is_direct_participant(&message.sender_id)
                    && target.is_direct_participant(peer)
            },
        };
        if target.is_deleted() || !same_conversation {
            return None;
        }

        Some(ReplyPreview {
            id: target.id,
            sender_id: target.sender_id,
            content: target.content,
        })
    }

    fn push_offline(&self, message: &Message, recipient_id: &str, conversation_id: &str, is_group: bool) {
        let notice = OfflineNotice {
            recipient_id: recipient_id.to_string(),
            sender_id: message.sender_id.clone(),
            preview: preview_text(
                &message.content,
                message.media_id.is_some(),
                self.preview_chars,
            ),
            is_group,
            conversation_id: conversation_id.to_string(),
        };
        spawn_offline_push(self.push.clone(), notice);
    }
}

fn new_message(
    sender: &str,
    conversation: &Conversation,
    msg: ChatMessage,
    expires_at: Option<DateTime<Utc>>,
) -> NewMessage {
    let (recipient_id, group_id) = match conversation {
        Conversation::Direct(to) => (Some(to.clone()), None),
        Conversation::Group(group_id) => (None, Some(group_id.clone())),
    };
    NewMessage {
        sender_id: sender.to_string(),
        recipient_id,
        group_id,
        content: msg.content,
        media_id: msg.media_id,
        reply_to_id: msg.reply_to_id,
        forwarded_from: msg.forwarded_from,
        latitude: msg.latitude,
        longitude: msg.longitude,
        expires_at,
        ..NewMessage::default()
    }
}

/// Live frame for a persisted message
fn outbound(message: &Message, reply_to: Option<ReplyPreview>) -> OutboundMessage {
    OutboundMessage {
        id: message.id.clone(),
        from: message.sender_id.clone(),
        to: message.recipient_id.clone(),
        group_id: message.group_id.clone(),
        content: message.content.clone(),
        media_id: message.media_id.clone(),
        reply_to,
        forwarded_from: message.forwarded_from.clone(),
        latitude: message.latitude,
        longitude: message.longitude,
        expires_at: message.expires_at,
        created_at: message.created_at,
    }
}

/// The sender's ack for a freshly persisted message
fn sent_ack(message: &Message, status: MessageStatus, client_id: Option<String>) -> ServerFrame {
    ServerFrame::Ack {
        message_id: message.id.clone(),
        status,
        client_id,
        from: None,
        created_at: Some(message.created_at),
    }
}
