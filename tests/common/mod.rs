//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chat_session::config::ClientConfig;
use chat_session::core::context::SessionContext;
use chat_session::core::registry::ConversationRegistry;
use chat_session::core::session::MessagingSession;
use chat_session::core::traits::Identity;
use chat_session::infrastructure::database::DatabaseConnection;
use chat_session::error::StoreError;
use chat_session::infrastructure::entities::{
    Chat, ChatMember, Membership, Message, MessagePatch, Profile, ProfilePatch,
};
use chat_session::infrastructure::feed::{ChangeFeed, ChangeFilter, Subscription};
use chat_session::infrastructure::repositories::SqliteChatStore;
use chat_session::infrastructure::traits::{ChatStore, StoreResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

pub struct TestStore {
    pub connection: Arc<DatabaseConnection>,
    pub feed: Arc<ChangeFeed>,
    pub store: Arc<dyn ChatStore>,
    pub config: Arc<ClientConfig>,
}

/// One signed-in user with its own registry and session.
pub struct Peer {
    pub profile: Profile,
    pub ctx: SessionContext,
    pub registry: Arc<ConversationRegistry>,
    pub session: MessagingSession,
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        heartbeat_interval: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

/// In-memory store with migrations applied
pub async fn setup_store() -> TestStore {
    setup_store_with(test_config()).await
}

pub async fn setup_store_with(config: ClientConfig) -> TestStore {
    let connection = Arc::new(DatabaseConnection::in_memory().await.unwrap());
    let feed = Arc::new(ChangeFeed::new(config.feed_capacity));
    let store: Arc<dyn ChatStore> = Arc::new(SqliteChatStore::new(connection.clone(), feed.clone()));

    TestStore {
        connection,
        feed,
        store,
        config: Arc::new(config),
    }
}

pub fn profile(username: &str, email: &str) -> Profile {
    Profile {
        id: Uuid::new_v4(),
        email: email.to_owned(),
        username: username.to_owned(),
        status: "Online".to_owned(),
        is_online: false,
        last_seen: None,
        created_at: Utc::now(),
        updated_at: None,
    }
}

pub async fn seed_profile(fixture: &TestStore, username: &str, email: &str) -> Profile {
    fixture
        .store
        .insert_profile(profile(username, email))
        .await
        .unwrap()
}

pub fn context_for(fixture: &TestStore, profile: &Profile) -> SessionContext {
    let identity = Identity {
        user_id: profile.id,
        email: profile.email.clone(),
    };
    SessionContext::new(identity, fixture.config.clone())
}

pub async fn peer(fixture: &TestStore, username: &str) -> Peer {
    peer_on(fixture, fixture.store.clone(), username).await
}

/// Like [`peer`], but the peer's registry and session talk to `store`.
pub async fn peer_on(fixture: &TestStore, store: Arc<dyn ChatStore>, username: &str) -> Peer {
    let profile = seed_profile(fixture, username, &format!("{username}@example.com")).await;
    let ctx = context_for(fixture, &profile);
    let registry = Arc::new(ConversationRegistry::new(ctx.clone(), store.clone()));
    let session = MessagingSession::new(ctx.clone(), store, registry.clone());

    Peer {
        profile,
        ctx,
        registry,
        session,
    }
}

/// Writes a message straight to the store, as another client would.
pub async fn remote_send(fixture: &TestStore, chat_id: Uuid, sender: &Profile, text: &str) -> Message {
    fixture
        .store
        .insert_message(Message::new(chat_id, sender.id, text.to_owned()))
        .await
        .unwrap()
}

pub fn contents(session: &MessagingSession) -> Vec<String> {
    session
        .timeline()
        .into_iter()
        .map(|message| message.content)
        .collect()
}

/// Polls `condition` until it holds, panicking after two seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Wraps a real store so tests can make subscribing fail or hold a message fetch open.
pub struct ControlledStore {
    inner: Arc<dyn ChatStore>,
    pub fail_subscribe: AtomicBool,
    pub hold_fetches: AtomicBool,
    /// Signalled once a held fetch has read its rows.
    pub fetched: Notify,
    /// Lets a held fetch return.
    pub release: Notify,
}

impl ControlledStore {
    pub fn new(inner: Arc<dyn ChatStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_subscribe: AtomicBool::new(false),
            hold_fetches: AtomicBool::new(false),
            fetched: Notify::new(),
            release: Notify::new(),
        })
    }
}

#[async_trait]
impl ChatStore for ControlledStore {
    async fn find_profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        self.inner.find_profile(user_id).await
    }

    async fn insert_profile(&self, profile: Profile) -> StoreResult<Profile> {
        self.inner.insert_profile(profile).await
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        patch: ProfilePatch,
    ) -> StoreResult<Option<Profile>> {
        self.inner.update_profile(user_id, patch).await
    }

    async fn find_profile_by_username(
        &self,
        username: &str,
        excluding: Uuid,
    ) -> StoreResult<Option<Profile>> {
        self.inner.find_profile_by_username(username, excluding).await
    }

    async fn search_profiles(
        &self,
        fragment: &str,
        excluding: Uuid,
        limit: u32,
    ) -> StoreResult<Vec<Profile>> {
        self.inner.search_profiles(fragment, excluding, limit).await
    }

    async fn list_online_profiles(&self, excluding: Uuid, limit: u32)
    -> StoreResult<Vec<Profile>> {
        self.inner.list_online_profiles(excluding, limit).await
    }

    async fn find_chat(&self, chat_id: Uuid) -> StoreResult<Option<Chat>> {
        self.inner.find_chat(chat_id).await
    }

    async fn insert_chat(&self, chat: Chat, members: Vec<ChatMember>) -> StoreResult<Chat> {
        self.inner.insert_chat(chat, members).await
    }

    async fn find_personal_chat(&self, first: Uuid, second: Uuid) -> StoreResult<Option<Chat>> {
        self.inner.find_personal_chat(first, second).await
    }

    async fn update_chat_preview(
        &self,
        chat_id: Uuid,
        preview: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Chat>> {
        self.inner.update_chat_preview(chat_id, preview, at).await
    }

    async fn insert_member(&self, member: ChatMember) -> StoreResult<ChatMember> {
        self.inner.insert_member(member).await
    }

    async fn find_membership(&self, chat_id: Uuid, user_id: Uuid)
    -> StoreResult<Option<ChatMember>> {
        self.inner.find_membership(chat_id, user_id).await
    }

    async fn list_memberships(&self, user_id: Uuid) -> StoreResult<Vec<Membership>> {
        self.inner.list_memberships(user_id).await
    }

    async fn find_message(&self, message_id: Uuid) -> StoreResult<Option<Message>> {
        self.inner.find_message(message_id).await
    }

    async fn list_recent_messages(&self, chat_id: Uuid, limit: u32) -> StoreResult<Vec<Message>> {
        let fetched = self.inner.list_recent_messages(chat_id, limit).await;
        if self.hold_fetches.load(Ordering::SeqCst) {
            self.fetched.notify_one();
            self.release.notified().await;
        }
        fetched
    }

    async fn insert_message(&self, message: Message) -> StoreResult<Message> {
        self.inner.insert_message(message).await
    }

    async fn update_message(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
        patch: MessagePatch,
    ) -> StoreResult<Option<Message>> {
        self.inner.update_message(message_id, sender_id, patch).await
    }

    async fn subscribe(&self, filter: ChangeFilter) -> StoreResult<Subscription> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        self.inner.subscribe(filter).await
    }
}
