// ============================
// crates/backend-lib/src/storage/memory.rs
// ============================
//! In-memory implementation of the [`Storage`] trait.
use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Storage, StoreError, StoreResult};
use crate::models::{
    Block, Contact, Conversation, ConversationSettings, DeviceToken, GroupMember, Media, Message,
    MessageDeletion, MessageStatus, NewMessage, Reaction, User,
};

/// Records the realtime core only reads. Registration, contacts, groups and
/// the rest are owned by the surrounding CRUD service; this is the snapshot
/// of them a store is seeded with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Directory {
    pub users: Vec<User>,
    pub contacts: Vec<Contact>,
    pub group_members: Vec<GroupMember>,
    pub blocks: Vec<Block>,
    pub media: Vec<Media>,
    pub conversation_settings: Vec<ConversationSettings>,
    pub device_tokens: Vec<DeviceToken>,
}

#[derive(Default)]
pub(super) struct Tables {
    users: HashMap<String, User>,
    /// contact_id -> owners who keep that contact
    watchers: HashMap<String, BTreeSet<String>>,
    /// group_id -> user_id -> membership
    groups: HashMap<String, HashMap<String, GroupMember>>,
    blocks: HashSet<(String, String)>,
    media: HashMap<String, Media>,
    settings: HashMap<(String, Conversation), ConversationSettings>,
    device_tokens: HashMap<String, Vec<DeviceToken>>,
    messages: HashMap<String, Message>,
    deletions: HashMap<(String, String), MessageDeletion>,
    reactions: HashMap<(String, String), Reaction>,
}

impl Tables {
    fn load_directory(&mut self, directory: Directory) {
        for user in directory.users {
            self.users.insert(user.id.clone(), user);
        }
        for contact in directory.contacts {
            self.add_contact(contact);
        }
        for member in directory.group_members {
            self.add_group_member(member);
        }
        for block in directory.blocks {
            self.blocks.insert((block.blocker_id, block.blocked_id));
        }
        for media in directory.media {
            self.media.insert(media.id.clone(), media);
        }
        for settings in directory.conversation_settings {
            self.settings.insert(
                (settings.user_id.clone(), settings.conversation.clone()),
                settings,
            );
        }
        for token in directory.device_tokens {
            self.add_device_token(token);
        }
    }

    fn add_contact(&mut self, contact: Contact) {
        self.watchers
            .entry(contact.contact_id)
            .or_default()
            .insert(contact.owner_id);
    }

    fn add_group_member(&mut self, member: GroupMember) {
        self.groups
            .entry(member.group_id.clone())
            .or_default()
            .insert(member.user_id.clone(), member);
    }

    fn add_device_token(&mut self, token: DeviceToken) {
        let tokens = self.device_tokens.entry(token.user_id.clone()).or_default();
        if !tokens.iter().any(|t| t.token == token.token) {
            tokens.push(token);
        }
    }

    fn message(&self, message_id: &str) -> StoreResult<&Message> {
        self.messages
            .get(message_id)
            .ok_or_else(|| StoreError::not_found("message", message_id))
    }

    fn message_mut(&mut self, message_id: &str) -> StoreResult<&mut Message> {
        self.messages
            .get_mut(message_id)
            .ok_or_else(|| StoreError::not_found("message", message_id))
    }

    pub(super) fn insert_message(
        &mut self,
        new: NewMessage,
        now: DateTime<Utc>,
    ) -> StoreResult<Message> {
        let recipient = new.recipient_id.filter(|s| !s.is_empty());
        let group = new.group_id.filter(|s| !s.is_empty());
        let media_id = new.media_id.filter(|s| !s.is_empty());

        if recipient.is_some() == group.is_some() {
            return Err(StoreError::Invariant(
                "message needs exactly one of recipient_id or group_id".to_string(),
            ));
        }
        if new.content.is_empty() && media_id.is_none() {
            return Err(StoreError::Invariant(
                "message needs content or media".to_string(),
            ));
        }
        if new.latitude.is_some() != new.longitude.is_some() {
            return Err(StoreError::Invariant(
                "latitude and longitude must be set together".to_string(),
            ));
        }

        let id = new
            .id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.messages.contains_key(&id) {
            return Err(StoreError::Conflict(format!("message {id} already exists")));
        }

        let message = Message {
            id: id.clone(),
            sender_id: new.sender_id,
            recipient_id: recipient,
            group_id: group,
            content: new.content,
            media_id,
            reply_to_id: new.reply_to_id.filter(|s| !s.is_empty()),
            forwarded_from: new.forwarded_from.filter(|s| !s.is_empty()),
            latitude: new.latitude,
            longitude: new.longitude,
            expires_at: new.expires_at,
            scheduled_at: new.scheduled_at,
            status: new.status.unwrap_or(MessageStatus::Sent),
            edited_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.messages.insert(id, message.clone());
        Ok(message)
    }

    pub(super) fn restore_message(&mut self, message: Message) {
        self.messages.insert(message.id.clone(), message);
    }

    pub(super) fn set_status(
        &mut self,
        message_id: &str,
        status: MessageStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let message = self.message_mut(message_id)?;
        if status < message.status {
            return Err(StoreError::Invariant(format!(
                "status of {message_id} cannot move from {} back to {}",
                message.status.as_str(),
                status.as_str()
            )));
        }
        if status == message.status {
            return Ok(false);
        }
        message.status = status;
        message.updated_at = now;
        Ok(true)
    }

    pub(super) fn set_content(
        &mut self,
        message_id: &str,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let message = self.message_mut(message_id)?;
        if message.is_deleted() {
            return Err(StoreError::Invariant(format!(
                "message {message_id} is deleted and cannot be edited"
            )));
        }
        if message.edited_at.is_some_and(|prev| edited_at < prev) {
            return Err(StoreError::Invariant(format!(
                "edited_at of {message_id} cannot move backwards"
            )));
        }
        message.content = content.to_string();
        message.edited_at = Some(edited_at);
        message.updated_at = edited_at;
        Ok(())
    }

    pub(super) fn soft_delete(
        &mut self,
        message_id: &str,
        deleted_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let message = self.message_mut(message_id)?;
        if message.deleted_at.is_some() {
            return Ok(false);
        }
        message.deleted_at = Some(deleted_at);
        message.updated_at = deleted_at;
        Ok(true)
    }

    pub(super) fn upsert_deletion(
        &mut self,
        message_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<MessageDeletion> {
        self.message(message_id)?;
        let row = self
            .deletions
            .entry((message_id.to_string(), user_id.to_string()))
            .or_insert_with(|| MessageDeletion {
                message_id: message_id.to_string(),
                user_id: user_id.to_string(),
                deleted_at: now,
            });
        Ok(row.clone())
    }

    pub(super) fn restore_deletion(&mut self, deletion: MessageDeletion) {
        self.deletions.insert(
            (deletion.message_id.clone(), deletion.user_id.clone()),
            deletion,
        );
    }

    pub(super) fn upsert_reaction(
        &mut self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Reaction> {
        self.message(message_id)?;
        let reaction = Reaction {
            message_id: message_id.to_string(),
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
            created_at: now,
        };
        self.restore_reaction(reaction.clone());
        Ok(reaction)
    }

    pub(super) fn restore_reaction(&mut self, reaction: Reaction) {
        self.reactions.insert(
            (reaction.message_id.clone(), reaction.user_id.clone()),
            reaction,
        );
    }

    pub(super) fn remove_reaction(&mut self, message_id: &str, user_id: &str) -> Option<Reaction> {
        self.reactions
            .remove(&(message_id.to_string(), user_id.to_string()))
    }

    pub(super) fn set_last_seen(&mut self, user_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::not_found("user", user_id))?;
        if user.last_seen.is_some_and(|prev| prev >= at) {
            return Ok(false);
        }
        user.last_seen = Some(at);
        Ok(true)
    }

    /// Capture the current state of the rows `change` is about to touch
    pub(super) fn undo_for(&self, change: Change<'_>) -> Undo {
        match change {
            Change::Message(id) => match self.messages.get(id) {
                Some(message) => Undo::Message(message.clone()),
                None => Undo::Nothing,
            },
            Change::Deletion(message_id, user_id) => {
                let key = (message_id.to_string(), user_id.to_string());
                let previous = self.deletions.get(&key).cloned();
                Undo::Deletion(key, previous)
            },
            Change::Reaction(message_id, user_id) => {
                let key = (message_id.to_string(), user_id.to_string());
                let previous = self.reactions.get(&key).cloned();
                Undo::Reaction(key, previous)
            },
            Change::LastSeen(user_id) => match self.users.get(user_id) {
                Some(user) => Undo::LastSeen(user_id.to_string(), user.last_seen),
                None => Undo::Nothing,
            },
        }
    }
}

/// Rows a write is about to touch
#[derive(Debug, Clone, Copy)]
pub(super) enum Change<'a> {
    Message(&'a str),
    Deletion(&'a str, &'a str),
    Reaction(&'a str, &'a str),
    LastSeen(&'a str),
}

/// Prior state of the rows a write touched, to roll it back when the write
/// cannot be made durable.
#[derive(Debug)]
pub(super) enum Undo {
    Nothing,
    CreatedMessage(String),
    Message(Message),
    Deletion((String, String), Option<MessageDeletion>),
    Reaction((String, String), Option<Reaction>),
    LastSeen(String, Option<DateTime<Utc>>),
}

impl Undo {
    pub(super) fn revert(self, tables: &mut Tables) {
        match self {
            Undo::Nothing => {},
            Undo::CreatedMessage(id) => {
                tables.messages.remove(&id);
            },
            Undo::Message(message) => tables.restore_message(message),
            Undo::Deletion(key, previous) => match previous {
                Some(row) => {
                    tables.deletions.insert(key, row);
                },
                None => {
                    tables.deletions.remove(&key);
                },
            },
            Undo::Reaction(key, previous) => match previous {
                Some(row) => {
                    tables.reactions.insert(key, row);
                },
                None => {
                    tables.reactions.remove(&key);
                },
            },
            Undo::LastSeen(user_id, previous) => {
                if let Some(user) = tables.users.get_mut(&user_id) {
                    user.last_seen = previous;
                }
            },
        }
    }
}

/// Indexed in-memory tables behind one readers-writer lock.
///
/// Used directly in tests and development, and as the working set of
/// [`super::FlatFileStorage`].
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_directory(directory: Directory) -> Self {
        let storage = Self::new();
        storage.tables.write().load_directory(directory);
        storage
    }

    pub(super) fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        f(&self.tables.read())
    }

    pub(super) fn write<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> T {
        f(&mut self.tables.write())
    }

    pub fn insert_user(&self, user: User) {
        self.tables.write().users.insert(user.id.clone(), user);
    }

    /// `owner_id` adds `contact_id` to their contacts
    pub fn add_contact(&self, owner_id: &str, contact_id: &str) {
        self.tables.write().add_contact(Contact {
            owner_id: owner_id.to_string(),
            contact_id: contact_id.to_string(),
        });
    }

    pub fn add_group_member(&self, member: GroupMember) {
        self.tables.write().add_group_member(member);
    }

    pub fn add_block(&self, blocker_id: &str, blocked_id: &str) {
        self.tables
            .write()
            .blocks
            .insert((blocker_id.to_string(), blocked_id.to_string()));
    }

    pub fn insert_media(&self, media: Media) {
        self.tables.write().media.insert(media.id.clone(), media);
    }

    pub fn set_conversation_settings(&self, settings: ConversationSettings) {
        self.tables.write().settings.insert(
            (settings.user_id.clone(), settings.conversation.clone()),
            settings,
        );
    }

    pub fn add_device_token(&self, token: DeviceToken) {
        self.tables.write().add_device_token(token);
    }

    /// Number of persisted messages, deleted ones included
    pub fn message_count(&self) -> usize {
        self.tables.read().messages.len()
    }

    pub fn deletions_for(&self, message_id: &str) -> Vec<MessageDeletion> {
        let tables = self.tables.read();
        let mut rows: Vec<_> = tables
            .deletions
            .values()
            .filter(|d| d.message_id == message_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        rows
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_user(&self, user_id: &str) -> StoreResult<User> {
        self.read(|t| {
            t.users
                .get(user_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("user", user_id))
        })
    }

    async fn get_message(&self, message_id: &str) -> StoreResult<Message> {
        self.read(|t| t.message(message_id).cloned())
    }

    async fn find_media(&self, media_id: &str) -> StoreResult<Media> {
        self.read(|t| {
            t.media
                .get(media_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("media", media_id))
        })
    }

    async fn is_group_member(&self, group_id: &str, user_id: &str) -> StoreResult<bool> {
        Ok(self.read(|t| {
            t.groups
                .get(group_id)
                .is_some_and(|members| members.contains_key(user_id))
        }))
    }

    async fn is_either_blocked(&self, a: &str, b: &str) -> StoreResult<bool> {
        Ok(self.read(|t| {
            t.blocks.contains(&(a.to_string(), b.to_string()))
                || t.blocks.contains(&(b.to_string(), a.to_string()))
        }))
    }

    async fn list_group_member_ids(&self, group_id: &str) -> StoreResult<Vec<String>> {
        Ok(self.read(|t| {
            let mut ids: Vec<String> = t
                .groups
                .get(group_id)
                .map(|members| members.keys().cloned().collect())
                .unwrap_or_default();
            ids.sort();
            ids
        }))
    }

    async fn list_contacts_of(&self, user_id: &str) -> StoreResult<Vec<String>> {
        Ok(self.read(|t| {
            t.watchers
                .get(user_id)
                .map(|owners| owners.iter().cloned().collect())
                .unwrap_or_default()
        }))
    }

    async fn get_disappearing_seconds(
        &self,
        user_id: &str,
        conversation: &Conversation,
    ) -> StoreResult<u32> {
        Ok(self.read(|t| {
            t.settings
                .get(&(user_id.to_string(), conversation.clone()))
                .map_or(0, |s| s.disappearing_seconds)
        }))
    }

    async fn find_device_tokens(&self, user_id: &str) -> StoreResult<Vec<DeviceToken>> {
        Ok(self.read(|t| t.device_tokens.get(user_id).cloned().unwrap_or_default()))
    }

    async fn create_message(&self, message: NewMessage) -> StoreResult<Message> {
        self.write(|t| t.insert_message(message, Utc::now()))
    }

    async fn update_message_status(
        &self,
        message_id: &str,
        status: MessageStatus,
    ) -> StoreResult<()> {
        self.write(|t| t.set_status(message_id, status, Utc::now()))
            .map(|_| ())
    }

    async fn update_message_content(
        &self,
        message_id: &str,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.write(|t| t.set_content(message_id, content, edited_at))
    }

    async fn soft_delete_message(
        &self,
        message_id: &str,
        deleted_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.write(|t| t.soft_delete(message_id, deleted_at))
            .map(|_| ())
    }

    async fn upsert_message_deletion(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> StoreResult<MessageDeletion> {
        self.write(|t| t.upsert_deletion(message_id, user_id, Utc::now()))
    }

    async fn upsert_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> StoreResult<Reaction> {
        self.write(|t| t.upsert_reaction(message_id, user_id, emoji, Utc::now()))
    }

    async fn remove_reaction(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<Reaction>> {
        Ok(self.write(|t| t.remove_reaction(message_id, user_id)))
    }

    async fn list_reactions(&self, message_id: &str) -> StoreResult<Vec<Reaction>> {
        Ok(self.read(|t| {
            let mut rows: Vec<Reaction> = t
                .reactions
                .values()
                .filter(|r| r.message_id == message_id)
                .cloned()
                .collect();
            rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
            rows
        }))
    }

    async fn stamp_last_seen(&self, user_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.write(|t| t.set_last_seen(user_id, at)).map(|_| ())
    }
}
