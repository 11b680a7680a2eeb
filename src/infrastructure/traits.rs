//! Infrastructure traits, used on higher levels to reach the persistent store

use crate::error::StoreError;
use crate::infrastructure::entities::{
    Chat, ChatMember, Membership, Message, MessagePatch, Profile, ProfilePatch,
};
use crate::infrastructure::feed::{ChangeFilter, Subscription};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>>;

    /// Fails with [`StoreError::Conflict`] when the id, email or username is taken.
    async fn insert_profile(&self, profile: Profile) -> StoreResult<Profile>;

    /// Returns the updated row, or `None` if no profile has this id.
    async fn update_profile(
        &self,
        user_id: Uuid,
        patch: ProfilePatch,
    ) -> StoreResult<Option<Profile>>;

    /// Looks up a profile by exact username, ignoring `excluding`.
    async fn find_profile_by_username(
        &self,
        username: &str,
        excluding: Uuid,
    ) -> StoreResult<Option<Profile>>;

    /// Profiles whose username or email contains `fragment`, case-insensitively.
    async fn search_profiles(
        &self,
        fragment: &str,
        excluding: Uuid,
        limit: u32,
    ) -> StoreResult<Vec<Profile>>;

    async fn list_online_profiles(&self, excluding: Uuid, limit: u32)
    -> StoreResult<Vec<Profile>>;

    async fn find_chat(&self, chat_id: Uuid) -> StoreResult<Option<Chat>>;

    /// Inserts a chat together with its initial members, atomically.
    ///
    /// Fails with [`StoreError::Conflict`] if a personal chat already exists for the pair.
    async fn insert_chat(&self, chat: Chat, members: Vec<ChatMember>) -> StoreResult<Chat>;

    async fn find_personal_chat(&self, first: Uuid, second: Uuid) -> StoreResult<Option<Chat>>;

    async fn update_chat_preview(
        &self,
        chat_id: Uuid,
        preview: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Chat>>;

    async fn insert_member(&self, member: ChatMember) -> StoreResult<ChatMember>;

    async fn find_membership(&self, chat_id: Uuid, user_id: Uuid)
    -> StoreResult<Option<ChatMember>>;

    /// All chats the user is a member of, newest-joined first.
    async fn list_memberships(&self, user_id: Uuid) -> StoreResult<Vec<Membership>>;

    async fn find_message(&self, message_id: Uuid) -> StoreResult<Option<Message>>;

    /// The most recent `limit` messages of a chat, oldest first.
    async fn list_recent_messages(&self, chat_id: Uuid, limit: u32) -> StoreResult<Vec<Message>>;

    async fn insert_message(&self, message: Message) -> StoreResult<Message>;

    /// Applies the patch only if `sender_id` sent the message. Returns the updated row, or
    /// `None` when nothing matched.
    async fn update_message(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
        patch: MessagePatch,
    ) -> StoreResult<Option<Message>>;

    /// Opens a live feed of committed changes matching `filter`.
    async fn subscribe(&self, filter: ChangeFilter) -> StoreResult<Subscription>;
}
