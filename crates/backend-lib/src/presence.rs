// ============================
// crates/backend-lib/src/presence.rs
// ============================
//! Presence events for a user's contacts, filtered by block pairs.
use chatwire_common::ServerFrame;
use chrono::{DateTime, Utc};

use crate::hub::Hub;
use crate::session::Payload;

pub(crate) async fn announce_online(hub: &Hub, user_id: &str) -> usize {
    announce(hub, user_id, true, None).await
}

pub(crate) async fn announce_offline(hub: &Hub, user_id: &str, last_seen: DateTime<Utc>) -> usize {
    announce(hub, user_id, false, Some(last_seen)).await
}

/// Send a presence frame to every live contact of `user_id` that is not in a
/// block pair with them. Returns how many sessions accepted it.
async fn announce(
    hub: &Hub,
    user_id: &str,
    online: bool,
    last_seen: Option<DateTime<Utc>>,
) -> usize {
    let storage = hub.storage();
    let contacts = match storage.list_contacts_of(user_id).await {
        Ok(contacts) => contacts,
        Err(e) => {
            tracing::warn!(user_id, error = %e, "failed to load contacts for presence");
            return 0;
        },
    };

    let frame = ServerFrame::Presence {
        user_id: user_id.to_string(),
        online,
        last_seen,
    };
    let payload = match Payload::encode(&frame) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode presence frame");
            return 0;
        },
    };

    let mut notified = 0;
    for contact in contacts {
        if contact == user_id || !hub.is_online(&contact) {
            continue;
        }
        match storage.is_either_blocked(user_id, &contact).await {
            Ok(false) => {},
            Ok(true) => continue,
            Err(e) => {
                tracing::warn!(user_id, contact = %contact, error = %e, "block lookup failed, skipping presence");
                continue;
            },
        }
        if hub.send_to_user(&contact, &payload) {
            notified += 1;
        }
    }

    tracing::debug!(user_id, online, notified, "presence announced");
    notified
}
