//! Conversations the signed-in user belongs to.

use crate::core::context::SessionContext;
use crate::error::{Error, Result, StoreError, ValidationError};
use crate::infrastructure::entities::{Chat, ChatKind, ChatMember, MemberRole, Membership};
use crate::infrastructure::traits::ChatStore;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Truncates a message to a conversation preview: at most `max_len` characters, the last
/// three replaced by `...` when cut.
pub fn preview_of(content: &str, max_len: usize) -> String {
    if content.chars().count() <= max_len {
        content.to_owned()
    } else {
        let mut preview: String = content.chars().take(max_len.saturating_sub(3)).collect();
        preview.push_str("...");
        preview
    }
}

pub struct ConversationRegistry {
    ctx: SessionContext,
    store: Arc<dyn ChatStore>,
    conversations: Mutex<Vec<Membership>>,
}

impl ConversationRegistry {
    pub fn new(ctx: SessionContext, store: Arc<dyn ChatStore>) -> Self {
        Self {
            ctx,
            store,
            conversations: Mutex::new(Vec::new()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, Vec<Membership>> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Last listing fetched by [`refresh`](Self::refresh), newest-joined first.
    pub fn conversations(&self) -> Vec<Membership> {
        self.cache().clone()
    }

    pub async fn refresh(&self) -> Result<Vec<Membership>> {
        let memberships = self
            .store
            .list_memberships(self.ctx.user_id())
            .await
            .map_err(Error::load("conversations"))?;

        *self.cache() = memberships.clone();
        Ok(memberships)
    }

    /// Returns the personal chat with `other_user_id`, creating it if none exists yet.
    pub async fn start_or_open(&self, other_user_id: Uuid) -> Result<Chat> {
        let user_id = self.ctx.user_id();
        if other_user_id == user_id {
            return Err(ValidationError::SelfConversation.into());
        }

        if let Some(chat) = self.store.find_personal_chat(user_id, other_user_id).await? {
            debug!("reusing personal chat {}", chat.id);
            return Ok(chat);
        }

        let now = Utc::now();
        let chat = Chat::personal(user_id, other_user_id, now);
        let members = [user_id, other_user_id]
            .into_iter()
            .map(|member| ChatMember {
                chat_id: chat.id,
                user_id: member,
                role: MemberRole::Member,
                joined_at: now,
            })
            .collect();

        let chat = match self.store.insert_chat(chat, members).await {
            Ok(chat) => {
                info!("created personal chat {} with {other_user_id}", chat.id);
                chat
            }
            // Lost a race against a concurrent start for the same pair.
            Err(StoreError::Conflict(_)) => self
                .store
                .find_personal_chat(user_id, other_user_id)
                .await?
                .ok_or_else(|| {
                    Error::Store(StoreError::Conflict(format!(
                        "personal chat with {other_user_id} vanished"
                    )))
                })?,
            Err(err) => return Err(err.into()),
        };

        self.refresh_quietly().await;
        Ok(chat)
    }

    /// Creates a group chat with the signed-in user as its only (admin) member.
    pub async fn create_group(&self, name: &str) -> Result<Chat> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingGroupName.into());
        }

        let now = Utc::now();
        let chat = Chat::group(name.to_owned(), now);
        let admin = ChatMember {
            chat_id: chat.id,
            user_id: self.ctx.user_id(),
            role: MemberRole::Admin,
            joined_at: now,
        };

        let chat = self.store.insert_chat(chat, vec![admin]).await?;
        info!("created group {name:?} ({})", chat.id);

        self.refresh_quietly().await;
        Ok(chat)
    }

    /// Adds `user_id` to a group. Only the group's admins may add members.
    pub async fn add_member(&self, chat_id: Uuid, user_id: Uuid) -> Result<ChatMember> {
        let chat = self
            .store
            .find_chat(chat_id)
            .await?
            .ok_or_else(|| Error::Unauthorized(format!("chat {chat_id} does not exist")))?;
        if chat.kind != ChatKind::Group {
            return Err(Error::Unauthorized(
                "members can only be added to group chats".to_owned(),
            ));
        }

        let caller = self
            .store
            .find_membership(chat_id, self.ctx.user_id())
            .await?;
        if !matches!(caller, Some(ChatMember { role: MemberRole::Admin, .. })) {
            return Err(Error::Unauthorized(format!(
                "only admins may add members to {chat_id}"
            )));
        }

        let member = self
            .store
            .insert_member(ChatMember {
                chat_id,
                user_id,
                role: MemberRole::Member,
                joined_at: Utc::now(),
            })
            .await?;
        Ok(member)
    }

    /// Refreshes the listing, logging instead of failing. Used after writes that already
    /// succeeded.
    pub(crate) async fn refresh_quietly(&self) {
        if let Err(err) = self.refresh().await {
            warn!("conversation list refresh failed: {err}");
        }
    }
}
