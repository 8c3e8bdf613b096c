// ============================
// crates/backend-lib/src/storage/flat_file.rs
// ============================
//! Flat-file storage: an in-memory working set plus an append-only journal.
//!
//! Layout under the data directory:
//! - `directory.json` - users, contacts, groups, blocks, media, settings and
//!   device tokens (maintained by the CRUD side, read at open)
//! - `journal.log` - one JSON line per write, replayed at open
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::memory::{Change, Tables, Undo};
use super::{Directory, MemoryStorage, Storage, StoreResult};
use crate::models::{
    Conversation, DeviceToken, Media, Message, MessageDeletion, MessageStatus, NewMessage,
    Reaction, User,
};

const DIRECTORY_FILE: &str = "directory.json";
const JOURNAL_FILE: &str = "journal.log";

/// One journaled write
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    MessageCreated {
        message: Message,
    },
    StatusChanged {
        message_id: String,
        status: MessageStatus,
        at: DateTime<Utc>,
    },
    ContentEdited {
        message_id: String,
        content: String,
        edited_at: DateTime<Utc>,
    },
    SoftDeleted {
        message_id: String,
        deleted_at: DateTime<Utc>,
    },
    DeletionUpserted {
        deletion: MessageDeletion,
    },
    ReactionUpserted {
        reaction: Reaction,
    },
    ReactionRemoved {
        message_id: String,
        user_id: String,
    },
    LastSeen {
        user_id: String,
        at: DateTime<Utc>,
    },
}

impl JournalEntry {
    /// Re-apply a journaled write. Entries were valid when written, so
    /// replay only reports a failure instead of aborting the open.
    fn replay(self, tables: &mut Tables) {
        let outcome = match self {
            JournalEntry::MessageCreated { message } => {
                tables.restore_message(message);
                Ok(())
            },
            JournalEntry::StatusChanged {
                message_id,
                status,
                at,
            } => tables.set_status(&message_id, status, at).map(|_| ()),
            JournalEntry::ContentEdited {
                message_id,
                content,
                edited_at,
            } => tables.set_content(&message_id, &content, edited_at),
            JournalEntry::SoftDeleted {
                message_id,
                deleted_at,
            } => tables.soft_delete(&message_id, deleted_at).map(|_| ()),
            JournalEntry::DeletionUpserted { deletion } => {
                tables.restore_deletion(deletion);
                Ok(())
            },
            JournalEntry::ReactionUpserted { reaction } => {
                tables.restore_reaction(reaction);
                Ok(())
            },
            JournalEntry::ReactionRemoved {
                message_id,
                user_id,
            } => {
                tables.remove_reaction(&message_id, &user_id);
                Ok(())
            },
            JournalEntry::LastSeen { user_id, at } => {
                tables.set_last_seen(&user_id, at).map(|_| ())
            },
        };
        if let Err(e) = outcome {
            tracing::warn!(error = %e, "skipping journal entry during replay");
        }
    }
}

/// Flat-file implementation of the Storage trait
pub struct FlatFileStorage {
    root: PathBuf,
    inner: MemoryStorage,
    journal: Mutex<tokio::fs::File>,
}

impl FlatFileStorage {
    /// Open (or create) a data directory, loading the directory snapshot and
    /// replaying the journal.
    pub fn open<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let directory_path = root.join(DIRECTORY_FILE);
        let directory: Directory = if directory_path.exists() {
            serde_json::from_str(&fs::read_to_string(&directory_path)?)?
        } else {
            Directory::default()
        };
        let inner = MemoryStorage::with_directory(directory);

        let journal_path = root.join(JOURNAL_FILE);
        let mut replayed = 0usize;
        if journal_path.exists() {
            let reader = BufReader::new(fs::File::open(&journal_path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JournalEntry>(&line) {
                    Ok(entry) => {
                        inner.write(|t| entry.replay(t));
                        replayed += 1;
                    },
                    Err(e) => tracing::warn!(error = %e, "ignoring unreadable journal line"),
                }
            }
        }

        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)?;

        tracing::info!(root = %root.display(), replayed, "flat-file storage opened");

        Ok(Self {
            root,
            inner,
            journal: Mutex::new(tokio::fs::File::from_std(file)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The in-memory working set, for seeding directory records
    pub fn memory(&self) -> &MemoryStorage {
        &self.inner
    }

    /// Apply a write to the working set and journal it as one step.
    ///
    /// The journal lock is held across both, so replay order matches apply
    /// order. A failed append rolls the working set back.
    async fn commit<T>(
        &self,
        apply: impl FnOnce(&mut Tables) -> StoreResult<Applied<T>>,
    ) -> StoreResult<T> {
        let mut journal = self.journal.lock().await;
        let applied = self.inner.write(apply)?;
        let Some(entry) = applied.entry else {
            return Ok(applied.value);
        };

        if let Err(e) = append(&mut journal, &entry).await {
            tracing::error!(error = %e, "journal append failed, rolling back write");
            let undo = applied.undo;
            self.inner.write(|t| undo.revert(t));
            return Err(e);
        }
        Ok(applied.value)
    }
}

/// A write applied to the working set, with its journal line and the undo
/// needed if that line cannot be written
struct Applied<T> {
    value: T,
    entry: Option<JournalEntry>,
    undo: Undo,
}

impl<T> Applied<T> {
    fn journaled(value: T, entry: JournalEntry, undo: Undo) -> Self {
        Self {
            value,
            entry: Some(entry),
            undo,
        }
    }

    /// Nothing changed, nothing to journal
    fn unchanged(value: T) -> Self {
        Self {
            value,
            entry: None,
            undo: Undo::Nothing,
        }
    }
}

async fn append(file: &mut tokio::fs::File, entry: &JournalEntry) -> StoreResult<()> {
    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');

    let len = file.metadata().await?.len();
    if let Err(e) = write_line(file, &line).await {
        // drop a torn line so the next append starts on a fresh one
        let _ = file.set_len(len).await;
        return Err(e.into());
    }
    Ok(())
}

async fn write_line(file: &mut tokio::fs::File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await
}

#[async_trait]
impl Storage for FlatFileStorage {
    async fn get_user(&self, user_id: &str) -> StoreResult<User> {
        self.inner.get_user(user_id).await
    }

    async fn get_message(&self, message_id: &str) -> StoreResult<Message> {
        self.inner.get_message(message_id).await
    }

    async fn find_media(&self, media_id: &str) -> StoreResult<Media> {
        self.inner.find_media(media_id).await
    }

    async fn is_group_member(&self, group_id: &str, user_id: &str) -> StoreResult<bool> {
        self.inner.is_group_member(group_id, user_id).await
    }

    async fn is_either_blocked(&self, a: &str, b: &str) -> StoreResult<bool> {
        self.inner.is_either_blocked(a, b).await
    }

    async fn list_group_member_ids(&self, group_id: &str) -> StoreResult<Vec<String>> {
        self.inner.list_group_member_ids(group_id).await
    }

    async fn list_contacts_of(&self, user_id: &str) -> StoreResult<Vec<String>> {
        self.inner.list_contacts_of(user_id).await
    }

    async fn get_disappearing_seconds(
        &self,
        user_id: &str,
        conversation: &Conversation,
    ) -> StoreResult<u32> {
        self.inner
            .get_disappearing_seconds(user_id, conversation)
            .await
    }

    async fn find_device_tokens(&self, user_id: &str) -> StoreResult<Vec<DeviceToken>> {
        self.inner.find_device_tokens(user_id).await
    }

    async fn create_message(&self, message: NewMessage) -> StoreResult<Message> {
        self.commit(|t| {
            let message = t.insert_message(message, Utc::now())?;
            let undo = Undo::CreatedMessage(message.id.clone());
            let entry = JournalEntry::MessageCreated {
                message: message.clone(),
            };
            Ok(Applied::journaled(message, entry, undo))
        })
        .await
    }

    async fn update_message_status(
        &self,
        message_id: &str,
        status: MessageStatus,
    ) -> StoreResult<()> {
        self.commit(|t| {
            let undo = t.undo_for(Change::Message(message_id));
            let at = Utc::now();
            if !t.set_status(message_id, status, at)? {
                return Ok(Applied::unchanged(()));
            }
            let entry = JournalEntry::StatusChanged {
                message_id: message_id.to_string(),
                status,
                at,
            };
            Ok(Applied::journaled((), entry, undo))
        })
        .await
    }

    async fn update_message_content(
        &self,
        message_id: &str,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.commit(|t| {
            let undo = t.undo_for(Change::Message(message_id));
            t.set_content(message_id, content, edited_at)?;
            let entry = JournalEntry::ContentEdited {
                message_id: message_id.to_string(),
                content: content.to_string(),
                edited_at,
            };
            Ok(Applied::journaled((), entry, undo))
        })
        .await
    }

    async fn soft_delete_message(
        &self,
        message_id: &str,
        deleted_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.commit(|t| {
            let undo = t.undo_for(Change::Message(message_id));
            if !t.soft_delete(message_id, deleted_at)? {
                return Ok(Applied::unchanged(()));
            }
            let entry = JournalEntry::SoftDeleted {
                message_id: message_id.to_string(),
                deleted_at,
            };
            Ok(Applied::journaled((), entry, undo))
        })
        .await
    }

    async fn upsert_message_deletion(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> StoreResult<MessageDeletion> {
        self.commit(|t| {
            let undo = t.undo_for(Change::Deletion(message_id, user_id));
            let existed = matches!(undo, Undo::Deletion(_, Some(_)));
            let deletion = t.upsert_deletion(message_id, user_id, Utc::now())?;
            if existed {
                return Ok(Applied::unchanged(deletion));
            }
            let entry = JournalEntry::DeletionUpserted {
                deletion: deletion.clone(),
            };
            Ok(Applied::journaled(deletion, entry, undo))
        })
        .await
    }

    async fn upsert_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> StoreResult<Reaction> {
        self.commit(|t| {
            let undo = t.undo_for(Change::Reaction(message_id, user_id));
            let reaction = t.upsert_reaction(message_id, user_id, emoji, Utc::now())?;
            let entry = JournalEntry::ReactionUpserted {
                reaction: reaction.clone(),
            };
            Ok(Applied::journaled(reaction, entry, undo))
        })
        .await
    }

    async fn remove_reaction(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<Reaction>> {
        self.commit(|t| {
            let undo = t.undo_for(Change::Reaction(message_id, user_id));
            let Some(removed) = t.remove_reaction(message_id, user_id) else {
                return Ok(Applied::unchanged(None));
            };
            let entry = JournalEntry::ReactionRemoved {
                message_id: message_id.to_string(),
                user_id: user_id.to_string(),
            };
            Ok(Applied::journaled(Some(removed), entry, undo))
        })
        .await
    }

    async fn list_reactions(&self, message_id: &str) -> StoreResult<Vec<Reaction>> {
        self.inner.list_reactions(message_id).await
    }

    async fn stamp_last_seen(&self, user_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.commit(|t| {
            let undo = t.undo_for(Change::LastSeen(user_id));
            if !t.set_last_seen(user_id, at)? {
                return Ok(Applied::unchanged(()));
            }
            let entry = JournalEntry::LastSeen {
                user_id: user_id.to_string(),
                at,
            };
            Ok(Applied::journaled((), entry, undo))
        })
        .await
    }
}
