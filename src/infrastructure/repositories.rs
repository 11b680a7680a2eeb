//! DB Repository abstractions

use crate::error::StoreError;
use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::entities::{
    Chat, ChatKind, ChatMember, Membership, Message, MessagePatch, Profile, ProfilePatch,
    TOMBSTONE, pair_key,
};
use crate::infrastructure::feed::{ChangeEvent, ChangeFeed, ChangeFilter, ChangeRow, Subscription};
use crate::infrastructure::traits::{ChatStore, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, warn};
use std::sync::Arc;
use uuid::Uuid;

/// [`ChatStore`] over SQLite. Every committed write is published on the change feed.
pub struct SqliteChatStore {
    connection: Arc<DatabaseConnection>,
    feed: Arc<ChangeFeed>,
}

impl SqliteChatStore {
    pub fn new(connection: Arc<DatabaseConnection>, feed: Arc<ChangeFeed>) -> Self {
        Self { connection, feed }
    }
}

fn store_error(err: sqlx::Error) -> StoreError {
    let err = StoreError::from(err);
    match &err {
        StoreError::Conflict(_) => warn!("{err}"),
        _ => error!("{err}"),
    }
    err
}

/// Escapes LIKE wildcards so the fragment matches literally (with `ESCAPE '\'`).
fn like_pattern(fragment: &str) -> String {
    let mut pattern = String::with_capacity(fragment.len() + 2);
    pattern.push('%');
    for c in fragment.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn find_profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        sqlx::query_as("SELECT * FROM profiles WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&**self.connection)
            .await
            .map_err(store_error)
    }

    async fn insert_profile(&self, profile: Profile) -> StoreResult<Profile> {
        let profile: Profile = sqlx::query_as(
            "INSERT INTO profiles (id, email, username, status, is_online, last_seen, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
            .bind(profile.id)
            .bind(profile.email)
            .bind(profile.username)
            .bind(profile.status)
            .bind(profile.is_online)
            .bind(profile.last_seen)
            .bind(profile.created_at)
            .bind(profile.updated_at)
            .fetch_one(&**self.connection)
            .await
            .map_err(store_error)?;

        self.feed
            .publish(ChangeEvent::insert(ChangeRow::Profile(profile.clone())));
        Ok(profile)
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        patch: ProfilePatch,
    ) -> StoreResult<Option<Profile>> {
        let profile: Option<Profile> = sqlx::query_as(
            "UPDATE profiles SET username = COALESCE(?, username), status = COALESCE(?, status), is_online = COALESCE(?, is_online), last_seen = COALESCE(?, last_seen), updated_at = COALESCE(?, updated_at) WHERE id = ? RETURNING *",
        )
            .bind(patch.username)
            .bind(patch.status)
            .bind(patch.is_online)
            .bind(patch.last_seen)
            .bind(patch.updated_at)
            .bind(user_id)
            .fetch_optional(&**self.connection)
            .await
            .map_err(store_error)?;

        if let Some(profile) = &profile {
            self.feed
                .publish(ChangeEvent::update(ChangeRow::Profile(profile.clone())));
        }
        Ok(profile)
    }

    async fn find_profile_by_username(
        &self,
        username: &str,
        excluding: Uuid,
    ) -> StoreResult<Option<Profile>> {
        sqlx::query_as("SELECT * FROM profiles WHERE username = ? AND id != ?")
            .bind(username)
            .bind(excluding)
            .fetch_optional(&**self.connection)
            .await
            .map_err(store_error)
    }

    async fn search_profiles(
        &self,
        fragment: &str,
        excluding: Uuid,
        limit: u32,
    ) -> StoreResult<Vec<Profile>> {
        let pattern = like_pattern(fragment);
        sqlx::query_as(
            "SELECT * FROM profiles WHERE id != ? AND (LOWER(username) LIKE ? ESCAPE '\\' OR LOWER(email) LIKE ? ESCAPE '\\') ORDER BY username ASC LIMIT ?",
        )
            .bind(excluding)
            .bind(&pattern)
            .bind(&pattern)
            .bind(i64::from(limit))
            .fetch_all(&**self.connection)
            .await
            .map_err(store_error)
    }

    async fn list_online_profiles(
        &self,
        excluding: Uuid,
        limit: u32,
    ) -> StoreResult<Vec<Profile>> {
        sqlx::query_as(
            "SELECT * FROM profiles WHERE is_online = 1 AND id != ? ORDER BY last_seen DESC LIMIT ?",
        )
        .bind(excluding)
        .bind(i64::from(limit))
        .fetch_all(&**self.connection)
        .await
        .map_err(store_error)
    }

    async fn find_chat(&self, chat_id: Uuid) -> StoreResult<Option<Chat>> {
        sqlx::query_as("SELECT * FROM chats WHERE id = ?")
            .bind(chat_id)
            .fetch_optional(&**self.connection)
            .await
            .map_err(store_error)
    }

    async fn insert_chat(&self, chat: Chat, members: Vec<ChatMember>) -> StoreResult<Chat> {
        let mut tx = self.connection.begin().await.map_err(store_error)?;

        let chat: Chat = sqlx::query_as(
            "INSERT INTO chats (id, kind, name, pair_key, last_message, last_message_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
            .bind(chat.id)
            .bind(chat.kind)
            .bind(chat.name)
            .bind(chat.pair_key)
            .bind(chat.last_message)
            .bind(chat.last_message_at)
            .bind(chat.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(store_error)?;

        let mut inserted = Vec::with_capacity(members.len());
        for member in members {
            let member: ChatMember = sqlx::query_as(
                "INSERT INTO chat_members (chat_id, user_id, role, joined_at) VALUES (?, ?, ?, ?) RETURNING *",
            )
                .bind(chat.id)
                .bind(member.user_id)
                .bind(member.role)
                .bind(member.joined_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(store_error)?;
            inserted.push(member);
        }

        tx.commit().await.map_err(store_error)?;

        self.feed
            .publish(ChangeEvent::insert(ChangeRow::Chat(chat.clone())));
        for member in inserted {
            self.feed
                .publish(ChangeEvent::insert(ChangeRow::ChatMember(member)));
        }
        Ok(chat)
    }

    async fn find_personal_chat(&self, first: Uuid, second: Uuid) -> StoreResult<Option<Chat>> {
        sqlx::query_as("SELECT * FROM chats WHERE kind = ? AND pair_key = ?")
            .bind(ChatKind::Personal)
            .bind(pair_key(first, second))
            .fetch_optional(&**self.connection)
            .await
            .map_err(store_error)
    }

    async fn update_chat_preview(
        &self,
        chat_id: Uuid,
        preview: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Chat>> {
        let chat: Option<Chat> = sqlx::query_as(
            "UPDATE chats SET last_message = ?, last_message_at = ? WHERE id = ? RETURNING *",
        )
        .bind(preview)
        .bind(at)
        .bind(chat_id)
        .fetch_optional(&**self.connection)
        .await
        .map_err(store_error)?;

        if let Some(chat) = &chat {
            self.feed
                .publish(ChangeEvent::update(ChangeRow::Chat(chat.clone())));
        }
        Ok(chat)
    }

    async fn insert_member(&self, member: ChatMember) -> StoreResult<ChatMember> {
        let member: ChatMember = sqlx::query_as(
            "INSERT INTO chat_members (chat_id, user_id, role, joined_at) VALUES (?, ?, ?, ?) RETURNING *",
        )
            .bind(member.chat_id)
            .bind(member.user_id)
            .bind(member.role)
            .bind(member.joined_at)
            .fetch_one(&**self.connection)
            .await
            .map_err(store_error)?;

        self.feed
            .publish(ChangeEvent::insert(ChangeRow::ChatMember(member.clone())));
        Ok(member)
    }

    async fn find_membership(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<ChatMember>> {
        sqlx::query_as("SELECT * FROM chat_members WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id)
            .fetch_optional(&**self.connection)
            .await
            .map_err(store_error)
    }

    async fn list_memberships(&self, user_id: Uuid) -> StoreResult<Vec<Membership>> {
        sqlx::query_as(
            "SELECT chats.*, chat_members.role, chat_members.joined_at FROM chat_members INNER JOIN chats ON chats.id = chat_members.chat_id WHERE chat_members.user_id = ? ORDER BY chat_members.joined_at DESC, chats.id DESC",
        )
            .bind(user_id)
            .fetch_all(&**self.connection)
            .await
            .map_err(store_error)
    }

    async fn find_message(&self, message_id: Uuid) -> StoreResult<Option<Message>> {
        sqlx::query_as("SELECT * FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_optional(&**self.connection)
            .await
            .map_err(store_error)
    }

    async fn list_recent_messages(&self, chat_id: Uuid, limit: u32) -> StoreResult<Vec<Message>> {
        let mut messages: Vec<Message> = sqlx::query_as(
            "SELECT * FROM messages WHERE chat_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(chat_id)
        .bind(i64::from(limit))
        .fetch_all(&**self.connection)
        .await
        .map_err(store_error)?;

        messages.reverse();
        Ok(messages)
    }

    async fn insert_message(&self, message: Message) -> StoreResult<Message> {
        let message: Message = sqlx::query_as(
            "INSERT INTO messages (id, chat_id, sender_id, content, created_at, is_edited, is_deleted, updated_at, deleted_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
            .bind(message.id)
            .bind(message.chat_id)
            .bind(message.sender_id)
            .bind(message.content)
            .bind(message.created_at)
            .bind(message.is_edited)
            .bind(message.is_deleted)
            .bind(message.updated_at)
            .bind(message.deleted_at)
            .fetch_one(&**self.connection)
            .await
            .map_err(store_error)?;

        self.feed
            .publish(ChangeEvent::insert(ChangeRow::Message(message.clone())));
        Ok(message)
    }

    async fn update_message(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
        patch: MessagePatch,
    ) -> StoreResult<Option<Message>> {
        let query = match patch {
            MessagePatch::Edit { content, at } => sqlx::query_as(
                "UPDATE messages SET content = ?, is_edited = 1, updated_at = ? WHERE id = ? AND sender_id = ? RETURNING *",
            )
                .bind(content)
                .bind(at),
            MessagePatch::Delete { at } => sqlx::query_as(
                "UPDATE messages SET content = ?, is_deleted = 1, deleted_at = ? WHERE id = ? AND sender_id = ? RETURNING *",
            )
                .bind(TOMBSTONE)
                .bind(at),
        };

        let message: Option<Message> = query
            .bind(message_id)
            .bind(sender_id)
            .fetch_optional(&**self.connection)
            .await
            .map_err(store_error)?;

        if let Some(message) = &message {
            self.feed
                .publish(ChangeEvent::update(ChangeRow::Message(message.clone())));
        }
        Ok(message)
    }

    async fn subscribe(&self, filter: ChangeFilter) -> StoreResult<Subscription> {
        Ok(self.feed.subscribe(filter))
    }
}
