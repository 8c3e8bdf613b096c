// ============================
// crates/backend-lib/src/push.rs
// ============================
//! Offline push notifications.
//!
//! The dispatcher raises an [`OfflineNotice`] whenever a live send did not
//! reach a recipient. Delivery is best-effort: [`spawn_offline_push`] runs the
//! gateway on a detached task and only logs failures.
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::metrics::{PUSH_FAILED, PUSH_OFFLINE};
use crate::models::{DeviceToken, Platform};
use crate::storage::{Storage, StoreError};

/// Preview used when a message carries media but no text
pub const ATTACHMENT_PREVIEW: &str = "Sent an attachment";

/// A recipient that missed a live delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineNotice {
    pub recipient_id: String,
    pub sender_id: String,
    pub preview: String,
    pub is_group: bool,
    /// Peer user id for direct messages, group id for group messages
    pub conversation_id: String,
}

/// What a provider hands to the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub conversation_id: String,
    pub is_group: bool,
    pub sender_id: String,
}

#[derive(Error, Debug)]
pub enum PushError {
    #[error("Device token rejected: {0}")]
    InvalidToken(String),

    #[error("Push provider error: {0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Transport to a platform push service (APNs, FCM, web push)
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, device: &DeviceToken, payload: &PushPayload) -> Result<(), PushError>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Notify `notice.recipient_id` out of band. Returns the number of
    /// devices the notice was handed to.
    async fn notify_offline(&self, notice: OfflineNotice) -> Result<usize, PushError>;
}

/// Resolves a user's devices through the store and fans the notice out to a
/// provider, one send per device.
pub struct DevicePushGateway {
    storage: Arc<dyn Storage>,
    provider: Arc<dyn PushProvider>,
}

impl DevicePushGateway {
    pub fn new(storage: Arc<dyn Storage>, provider: Arc<dyn PushProvider>) -> Self {
        Self { storage, provider }
    }

    async fn title_for(&self, sender_id: &str) -> String {
        match self.storage.get_user(sender_id).await {
            Ok(user) => user.username,
            Err(e) => {
                tracing::debug!(sender_id, error = %e, "sender lookup failed, using id as push title");
                sender_id.to_string()
            },
        }
    }
}

#[async_trait]
impl PushGateway for DevicePushGateway {
    async fn notify_offline(&self, notice: OfflineNotice) -> Result<usize, PushError> {
        let devices = self.storage.find_device_tokens(&notice.recipient_id).await?;
        if devices.is_empty() {
            tracing::debug!(recipient_id = %notice.recipient_id, "no registered devices");
            return Ok(0);
        }

        let payload = PushPayload {
            title: self.title_for(&notice.sender_id).await,
            body: notice.preview,
            conversation_id: notice.conversation_id,
            is_group: notice.is_group,
            sender_id: notice.sender_id,
        };

        let mut sent = 0;
        for device in &devices {
            match self.provider.send(device, &payload).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    counter!(PUSH_FAILED).increment(1);
                    tracing::warn!(
                        provider = self.provider.name(),
                        recipient_id = %notice.recipient_id,
                        platform = ?device.platform,
                        error = %e,
                        "push send failed"
                    );
                },
            }
        }
        Ok(sent)
    }
}

/// Provider that only logs; the default until a platform provider is wired in
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPushProvider;

#[async_trait]
impl PushProvider for LogPushProvider {
    async fn send(&self, device: &DeviceToken, payload: &PushPayload) -> Result<(), PushError> {
        let platform = match device.platform {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Web => "web",
        };
        tracing::info!(
            user_id = %device.user_id,
            platform,
            conversation_id = %payload.conversation_id,
            is_group = payload.is_group,
            "push: {}: {}",
            payload.title,
            payload.body
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Run the gateway on a detached task. The caller never waits on delivery.
pub fn spawn_offline_push(gateway: Arc<dyn PushGateway>, notice: OfflineNotice) -> JoinHandle<()> {
    counter!(PUSH_OFFLINE).increment(1);
    tokio::spawn(async move {
        let recipient_id = notice.recipient_id.clone();
        match gateway.notify_offline(notice).await {
            Ok(devices) => tracing::debug!(%recipient_id, devices, "offline push dispatched"),
            Err(e) => {
                counter!(PUSH_FAILED).increment(1);
                tracing::warn!(%recipient_id, error = %e, "offline push failed");
            },
        }
    })
}

/// Body text for a push: the content cut to `max_chars` characters, or a
/// placeholder when only media was sent.
pub fn preview_text(content: &str, has_media: bool, max_chars: usize) -> String {
    if content.is_empty() && has_media {
        return ATTACHMENT_PREVIEW.to_string();
    }
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}
