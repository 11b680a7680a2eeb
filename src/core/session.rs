//! The messaging session: one open conversation and the timeline that keeps it current.
//!
//! The session moves `Closed -> Opening -> Open -> Closed`. Every `open`/`close` bumps an
//! epoch; the push pump and in-flight local operations capture the epoch they started
//! under and may only touch the timeline while it is still current. Remote inserts are
//! merged by id, so redelivered notifications never duplicate an entry, and the local
//! user's own notifications are ignored because local writes already reach the timeline.

use crate::core::context::SessionContext;
use crate::core::registry::{ConversationRegistry, preview_of};
use crate::core::timeline::Timeline;
use crate::error::{Error, Result, ValidationError, WriteAction};
use crate::infrastructure::entities::{Message, MessagePatch};
use crate::infrastructure::feed::{
    ChangeEvent, ChangeFilter, ChangeOperation, ChangeRow, Notification, Subscription,
    SubscriptionHandle,
};
use crate::infrastructure::traits::ChatStore;
use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "chat_id", rename_all = "lowercase")]
pub enum SessionPhase {
    Closed,
    Opening(Uuid),
    Open(Uuid),
}

impl SessionPhase {
    pub fn chat_id(&self) -> Option<Uuid> {
        match self {
            SessionPhase::Closed => None,
            SessionPhase::Opening(chat_id) | SessionPhase::Open(chat_id) => Some(*chat_id),
        }
    }
}

/// Read-only view handed to the rendering layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub messages: Vec<Message>,
}

/// Trims and checks outgoing message text.
pub fn validate_text(text: &str, max_len: usize) -> std::result::Result<String, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    let len = text.chars().count();
    if len > max_len {
        return Err(ValidationError::TooLong { len, max: max_len });
    }
    Ok(text.to_owned())
}

/// A remote change merged while a reload was in flight.
struct RemoteChange {
    seq: u64,
    operation: ChangeOperation,
    message: Message,
}

struct SessionState {
    phase: SessionPhase,
    epoch: u64,
    timeline: Timeline,
    subscription: Option<SubscriptionHandle>,
    pump: Option<JoinHandle<()>>,
    reloads_in_flight: usize,
    remote_seq: u64,
    remote_log: Vec<RemoteChange>,
}

impl SessionState {
    /// Drops everything tied to the previous conversation and starts a new epoch.
    fn reset(&mut self, phase: SessionPhase) -> u64 {
        self.epoch += 1;
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.timeline.clear();
        self.reloads_in_flight = 0;
        self.remote_log.clear();
        self.phase = phase;
        self.epoch
    }
}

struct Shared {
    ctx: SessionContext,
    store: Arc<dyn ChatStore>,
    registry: Arc<ConversationRegistry>,
    state: Mutex<SessionState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.state().epoch == epoch
    }

    /// The chat and epoch of an `Open` session.
    fn open_chat(&self) -> Result<(Uuid, u64)> {
        let state = self.state();
        match state.phase {
            SessionPhase::Open(chat_id) => Ok((chat_id, state.epoch)),
            _ => Err(Error::NotOpen),
        }
    }

    async fn reload(&self) -> Result<()> {
        let (chat_id, epoch, mark) = {
            let mut state = self.state();
            let chat_id = state.phase.chat_id().ok_or(Error::NotOpen)?;
            state.reloads_in_flight += 1;
            (chat_id, state.epoch, state.remote_seq)
        };

        let fetched = self
            .store
            .list_recent_messages(chat_id, self.ctx.config().history_limit)
            .await;

        let mut state = self.state();
        if state.epoch != epoch {
            debug!("discarding reload of superseded conversation {chat_id}");
            return Err(Error::Stale(chat_id));
        }
        state.reloads_in_flight -= 1;

        let result = match fetched {
            Ok(messages) => {
                state.timeline.replace(messages);
                // Changes merged during the fetch may be missing from its result.
                let replay: Vec<(ChangeOperation, Message)> = state
                    .remote_log
                    .iter()
                    .filter(|change| change.seq > mark)
                    .map(|change| (change.operation, change.message.clone()))
                    .collect();
                for (operation, message) in replay {
                    match operation {
                        ChangeOperation::Insert => state.timeline.upsert(message),
                        _ => {
                            state.timeline.update(message);
                        }
                    }
                }
                if let SessionPhase::Opening(_) = state.phase {
                    info!(
                        "conversation {chat_id} open with {} messages",
                        state.timeline.len()
                    );
                    state.phase = SessionPhase::Open(chat_id);
                }
                Ok(())
            }
            Err(source) => {
                warn!("could not load messages of {chat_id}: {source}");
                Err(Error::Load {
                    what: "messages",
                    source,
                })
            }
        };

        if state.reloads_in_flight == 0 {
            state.remote_log.clear();
        }
        result
    }

    /// Merges one pushed change. Returns whether the timeline changed.
    fn apply_remote(&self, epoch: u64, event: ChangeEvent) -> bool {
        let ChangeRow::Message(message) = event.row else {
            return false;
        };

        let mut state = self.state();
        if state.epoch != epoch {
            debug!("dropping notification for superseded conversation");
            return false;
        }
        if state.phase.chat_id() != Some(message.chat_id) {
            return false;
        }
        if message.sender_id == self.ctx.user_id() {
            debug!("ignoring own message {}", message.id);
            return false;
        }

        state.remote_seq += 1;
        if state.reloads_in_flight > 0 {
            let seq = state.remote_seq;
            state.remote_log.push(RemoteChange {
                seq,
                operation: event.operation,
                message: message.clone(),
            });
        }

        match (state.phase, event.operation) {
            (SessionPhase::Open(_), ChangeOperation::Insert) => state.timeline.merge(message),
            (SessionPhase::Open(_), ChangeOperation::Update) => state.timeline.update(message),
            _ => false,
        }
    }

    /// Applies a successful local write, then re-fetches to pick up everything else.
    async fn reconcile(&self, epoch: u64, message: Message) {
        {
            let mut state = self.state();
            if state.epoch != epoch {
                debug!("conversation switched during write of {}", message.id);
                return;
            }
            state.timeline.upsert(message);
        }

        match self.reload().await {
            Ok(()) | Err(Error::Stale(_)) => {}
            Err(err) => warn!("timeline reload after write failed: {err}"),
        }
    }

    /// Finds a message of the open chat, locally first.
    async fn find_message(&self, chat_id: Uuid, message_id: Uuid) -> Result<Message> {
        let cached = self.state().timeline.get(message_id).cloned();
        if let Some(message) = cached {
            return Ok(message);
        }

        match self
            .store
            .find_message(message_id)
            .await
            .map_err(Error::load("message"))?
        {
            Some(message) if message.chat_id == chat_id => Ok(message),
            _ => Err(Error::MessageNotFound(message_id)),
        }
    }
}

async fn pump(shared: Arc<Shared>, mut subscription: Subscription, epoch: u64) {
    while let Some(notification) = subscription.next().await {
        match notification {
            Notification::Change(event) => {
                if shared.apply_remote(epoch, event) {
                    shared.registry.refresh_quietly().await;
                }
            }
            Notification::Lagged(_) if shared.is_current(epoch) => {
                if let Err(err) = shared.reload().await {
                    warn!("resync after lagging subscription failed: {err}");
                }
            }
            Notification::Lagged(_) => break,
        }
    }
    debug!("subscription pump for epoch {epoch} finished");
}

pub struct MessagingSession {
    shared: Arc<Shared>,
}

impl MessagingSession {
    pub fn new(
        ctx: SessionContext,
        store: Arc<dyn ChatStore>,
        registry: Arc<ConversationRegistry>,
    ) -> Self {
        let state = SessionState {
            phase: SessionPhase::Closed,
            epoch: 0,
            timeline: Timeline::new(),
            subscription: None,
            pump: None,
            reloads_in_flight: 0,
            remote_seq: 0,
            remote_log: Vec::new(),
        };

        Self {
            shared: Arc::new(Shared {
                ctx,
                store,
                registry,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.state().phase
    }

    pub fn current_chat(&self) -> Option<Uuid> {
        self.phase().chat_id()
    }

    pub fn timeline(&self) -> Vec<Message> {
        self.shared.state().timeline.messages().to_vec()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.shared.state();
        SessionSnapshot {
            phase: state.phase,
            messages: state.timeline.messages().to_vec(),
        }
    }

    /// Opens `chat_id`, replacing whatever conversation was open.
    ///
    /// If the initial fetch fails the session stays `Opening` and [`reload`](Self::reload)
    /// may be retried. If subscribing fails the session goes back to `Closed`.
    pub async fn open(&self, chat_id: Uuid) -> Result<()> {
        let epoch = self.shared.state().reset(SessionPhase::Opening(chat_id));
        info!("opening conversation {chat_id}");

        let subscription = match self
            .shared
            .store
            .subscribe(ChangeFilter::messages_in(chat_id))
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => {
                let mut state = self.shared.state();
                if state.epoch == epoch {
                    state.reset(SessionPhase::Closed);
                }
                warn!("could not subscribe to {chat_id}: {err}");
                return Err(Error::load("subscription")(err));
            }
        };

        {
            let mut state = self.shared.state();
            if state.epoch != epoch {
                return Err(Error::Stale(chat_id));
            }
            state.subscription = Some(subscription.handle());
            state.pump = Some(tokio::spawn(pump(
                self.shared.clone(),
                subscription,
                epoch,
            )));
        }

        self.shared.reload().await
    }

    /// Re-fetches the recent window of the open (or opening) conversation.
    pub async fn reload(&self) -> Result<()> {
        self.shared.reload().await
    }

    /// Closes the conversation. No notification reaches the timeline after this returns.
    pub fn close(&self) {
        let mut state = self.shared.state();
        if let Some(chat_id) = state.phase.chat_id() {
            info!("closing conversation {chat_id}");
        }
        state.reset(SessionPhase::Closed);
    }

    pub async fn send(&self, text: &str) -> Result<Message> {
        let (chat_id, epoch) = self.shared.open_chat()?;
        let config = self.shared.ctx.config();
        let content = validate_text(text, config.max_message_len)?;

        let message = self
            .shared
            .store
            .insert_message(Message::new(chat_id, self.shared.ctx.user_id(), content))
            .await
            .map_err(Error::write(WriteAction::Send))?;
        debug!("sent message {} to {chat_id}", message.id);

        let preview = preview_of(&message.content, config.preview_len);
        if let Err(err) = self
            .shared
            .store
            .update_chat_preview(chat_id, &preview, message.created_at)
            .await
        {
            warn!("could not update preview of {chat_id}: {err}");
        }

        self.shared.reconcile(epoch, message.clone()).await;
        self.shared.registry.refresh_quietly().await;
        Ok(message)
    }

    /// Edits one of the local user's messages. Returns `None` when there was nothing to
    /// change.
    pub async fn edit(&self, message_id: Uuid, new_text: &str) -> Result<Option<Message>> {
        let (chat_id, epoch) = self.shared.open_chat()?;
        let current = self.shared.find_message(chat_id, message_id).await?;
        if current.sender_id != self.shared.ctx.user_id() {
            return Err(Error::Unauthorized(format!(
                "only the sender may edit message {message_id}"
            )));
        }

        let content = new_text.trim();
        if content.is_empty() || content == current.content || current.is_deleted {
            return Ok(None);
        }
        let content = validate_text(content, self.shared.ctx.config().max_message_len)?;

        let patch = MessagePatch::Edit {
            content,
            at: Utc::now(),
        };
        self.write_patch(epoch, message_id, patch, WriteAction::Edit)
            .await
            .map(Some)
    }

    /// Soft-deletes one of the local user's messages; it stays in the timeline as a
    /// tombstone. Returns `None` if it was already deleted.
    pub async fn delete(&self, message_id: Uuid) -> Result<Option<Message>> {
        let (chat_id, epoch) = self.shared.open_chat()?;
        let current = self.shared.find_message(chat_id, message_id).await?;
        if current.sender_id != self.shared.ctx.user_id() {
            return Err(Error::Unauthorized(format!(
                "only the sender may delete message {message_id}"
            )));
        }
        if current.is_deleted {
            return Ok(None);
        }

        let patch = MessagePatch::Delete { at: Utc::now() };
        self.write_patch(epoch, message_id, patch, WriteAction::Delete)
            .await
            .map(Some)
    }

    async fn write_patch(
        &self,
        epoch: u64,
        message_id: Uuid,
        patch: MessagePatch,
        action: WriteAction,
    ) -> Result<Message> {
        // The store only touches rows sent by us; no row back means it was refused.
        let updated = self
            .shared
            .store
            .update_message(message_id, self.shared.ctx.user_id(), patch)
            .await
            .map_err(Error::write(action))?
            .ok_or_else(|| {
                Error::Unauthorized(format!("the store refused to {action} {message_id}"))
            })?;

        self.shared.reconcile(epoch, updated.clone()).await;
        Ok(updated)
    }
}

impl Drop for MessagingSession {
    fn drop(&mut self) {
        self.shared.state().reset(SessionPhase::Closed);
    }
}
