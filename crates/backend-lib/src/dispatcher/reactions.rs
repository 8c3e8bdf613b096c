// ============================
// crates/backend-lib/src/dispatcher/reactions.rs
// ============================
use std::collections::BTreeMap;

use chatwire_common::{non_empty, ReactionAction, ReactionOutcome, ReactionSummary, ServerFrame};

use super::Dispatcher;
use crate::error::AppError;
use crate::models::Reaction;
use crate::session::Session;
use crate::validation::ValidationError;

impl Dispatcher {
    pub(super) async fn handle_reaction(
        &self,
        session: &Session,
        message_id: &str,
        action: ReactionAction,
        emoji: Option<String>,
    ) -> Result<(), AppError> {
        let user_id = session.user_id();
        let message = self.load_message(message_id).await?;

        match &message.group_id {
            Some(group_id) => self.require_group_member(group_id, user_id).await?,
            None if message.is_direct_participant(user_id) => {},
            None => {
                return Err(AppError::Unauthorized(
                    "Not a participant in this conversation".to_string(),
                ))
            },
        }
        if message.is_deleted() {
            return Err(AppError::Unauthorized(
                "Cannot react to a deleted message".to_string(),
            ));
        }

        let (emoji, outcome) = match action {
            ReactionAction::Add => {
                let emoji = non_empty(&emoji).ok_or(ValidationError::MissingField("emoji"))?;
                let row = self
                    .storage
                    .upsert_reaction(message_id, user_id, emoji)
                    .await?;
                (row.emoji, ReactionOutcome::Added)
            },
            ReactionAction::Remove => {
                let removed = self.storage.remove_reaction(message_id, user_id).await?;
                let emoji = removed
                    .map(|row| row.emoji)
                    .or(emoji)
                    .unwrap_or_default();
                (emoji, ReactionOutcome::Removed)
            },
        };

        let reactions = summarize_reactions(&self.storage.list_reactions(message_id).await?);
        let frame = ServerFrame::Reaction {
            message_id: message_id.to_string(),
            user_id: user_id.to_string(),
            emoji,
            action: outcome,
            reactions,
        };
        self.notify_conversation(session, &message, &frame).await
    }
}

/// Per-emoji tallies, most used first; ties keep emoji order.
pub fn summarize_reactions(rows: &[Reaction]) -> Vec<ReactionSummary> {
    let mut by_emoji: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for row in rows {
        by_emoji
            .entry(row.emoji.as_str())
            .or_default()
            .push(row.user_id.clone());
    }

    let mut summary: Vec<ReactionSummary> = by_emoji
        .into_iter()
        .map(|(emoji, mut users)| {
            users.sort();
            ReactionSummary {
                emoji: emoji.to_string(),
                count: users.len(),
                users,
            }
        })
        .collect();
    summary.sort_by(|a, b| b.count.cmp(&a.count));
    summary
}

#[cfg(test)]
mod tests {
    use super::super::fixture::Fixture;
    use super::*;
    use crate::models::NewMessage;
    use crate::storage::Storage;
    use chrono::Utc;

    fn row(user_id: &str, emoji: &str) -> Reaction {
        Reaction {
            message_id: "m1".to_string(),
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_summarize_reactions() {
        let rows = vec![row("carol", "👍"), row("alice", "🎉"), row("bob", "👍")];
        let summary = summarize_reactions(&rows);
        assert_eq!(
            summary,
            vec![
                ReactionSummary {
                    emoji: "👍".to_string(),
                    count: 2,
                    users: vec!["bob".to_string(), "carol".to_string()],
                },
                ReactionSummary {
                    emoji: "🎉".to_string(),
                    count: 1,
                    users: vec!["alice".to_string()],
                },
            ]
        );
        assert!(summarize_reactions(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_add_replace_remove() {
        let fx = Fixture::new();
        let message = fx
            .storage
            .create_message(NewMessage::direct("alice", "bob", "hi"))
            .await
            .unwrap();
        let mut alice = fx.connect("alice").await;
        let mut bob = fx.connect("bob").await;

        let add = |emoji: &str| {
            format!(
                r#"{{"type":"reaction","message_id":"{}","action":"add","emoji":"{emoji}"}}"#,
                message.id
            )
        };
        fx.send(&bob, &add("👍")).await;
        fx.send(&bob, &add("❤️")).await;

        let first = bob.next_frame();
        assert_eq!(alice.next_frame(), first);
        let second = bob.next_frame();
        assert_eq!(alice.next_frame(), second);
        let ServerFrame::Reaction {
            user_id,
            emoji,
            action,
            reactions,
            ..
        } = second
        else {
            panic!("expected reaction frame");
        };
        assert_eq!(user_id, "bob");
        assert_eq!(emoji, "❤️");
        assert_eq!(action, ReactionOutcome::Added);
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "❤️");
        assert_eq!(fx.storage.list_reactions(&message.id).await.unwrap().len(), 1);

        let remove = format!(
            r#"{{"type":"reaction","message_id":"{}","action":"remove"}}"#,
            message.id
        );
        fx.send(&bob, &remove).await;
        let ServerFrame::Reaction {
            emoji,
            action,
            reactions,
            ..
        } = bob.next_frame()
        else {
            panic!("expected reaction frame");
        };
        assert_eq!(emoji, "❤️");
        assert_eq!(action, ReactionOutcome::Removed);
        assert!(reactions.is_empty());
        assert!(fx.storage.list_reactions(&message.id).await.unwrap().is_empty());

        // removing again is not an error
        fx.send(&bob, &remove).await;
        assert!(matches!(
            bob.next_frame(),
            ServerFrame::Reaction {
                action: ReactionOutcome::Removed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_group_reaction_needs_membership() {
        let fx = Fixture::new();
        let message = fx
            .storage
            .create_message(NewMessage::group("alice", "g1", "vote"))
            .await
            .unwrap();
        let mut dave = fx.connect("dave").await;
        let mut carol = fx.connect("carol").await;
        let mut alice = fx.connect("alice").await;

        let frame = format!(
            r#"{{"type":"reaction","message_id":"{}","action":"add","emoji":"✅"}}"#,
            message.id
        );
        fx.send(&dave, &frame).await;
        assert_eq!(
            dave.next_frame(),
            ServerFrame::error("Not a member of this group")
        );

        fx.send(&carol, &frame).await;
        let update = carol.next_frame();
        assert_eq!(alice.next_frame(), update);
        assert!(matches!(update, ServerFrame::Reaction { .. }));
    }

    #[tokio::test]
    async fn test_direct_reaction_needs_participant() {
        let fx = Fixture::new();
        let message = fx
            .storage
            .create_message(NewMessage::direct("alice", "bob", "hi"))
            .await
            .unwrap();
        let mut carol = fx.connect("carol").await;

        let frame = format!(
            r#"{{"type":"reaction","message_id":"{}","action":"add","emoji":"👀"}}"#,
            message.id
        );
        fx.send(&carol, &frame).await;
        assert_eq!(
            carol.next_frame(),
            ServerFrame::error("Not a participant in this conversation")
        );
    }

    #[tokio::test]
    async fn test_add_requires_emoji() {
        let fx = Fixture::new();
        let message = fx
            .storage
            .create_message(NewMessage::direct("alice", "bob", "hi"))
            .await
            .unwrap();
        let mut bob = fx.connect("bob").await;

        let frame = format!(
            r#"{{"type":"reaction","message_id":"{}","action":"add"}}"#,
            message.id
        );
        fx.send(&bob, &frame).await;
        assert_eq!(bob.next_frame(), ServerFrame::error("Missing field: emoji"));
    }
}
