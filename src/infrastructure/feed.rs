//! In-process change notification feed.
//!
//! Every committed write of the store is published once on a broadcast channel. A
//! [`Subscription`] filters that channel by table and chat, and can be cancelled from any
//! clone of its [`SubscriptionHandle`]; once cancelled it never yields again.

use crate::infrastructure::entities::{Chat, ChatMember, Message, Profile};
use async_stream::stream;
use futures_util::Stream;
use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    Chats,
    ChatMembers,
    Messages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum ChangeRow {
    Profile(Profile),
    Chat(Chat),
    ChatMember(ChatMember),
    Message(Message),
}

impl ChangeRow {
    pub fn table(&self) -> Table {
        match self {
            ChangeRow::Profile(_) => Table::Profiles,
            ChangeRow::Chat(_) => Table::Chats,
            ChangeRow::ChatMember(_) => Table::ChatMembers,
            ChangeRow::Message(_) => Table::Messages,
        }
    }

    /// The chat a row belongs to, if any.
    pub fn chat_id(&self) -> Option<Uuid> {
        match self {
            ChangeRow::Profile(_) => None,
            ChangeRow::Chat(chat) => Some(chat.id),
            ChangeRow::ChatMember(member) => Some(member.chat_id),
            ChangeRow::Message(message) => Some(message.chat_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub operation: ChangeOperation,
    pub row: ChangeRow,
}

impl ChangeEvent {
    pub fn insert(row: ChangeRow) -> Self {
        Self {
            operation: ChangeOperation::Insert,
            row,
        }
    }

    pub fn update(row: ChangeRow) -> Self {
        Self {
            operation: ChangeOperation::Update,
            row,
        }
    }
}

/// Predicate selecting the notifications a subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: Table,
    pub chat_id: Option<Uuid>,
}

impl ChangeFilter {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            chat_id: None,
        }
    }

    /// Message changes of a single chat.
    pub fn messages_in(chat_id: Uuid) -> Self {
        Self {
            table: Table::Messages,
            chat_id: Some(chat_id),
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.row.table() == self.table
            && self
                .chat_id
                .is_none_or(|chat_id| event.row.chat_id() == Some(chat_id))
    }
}

#[derive(Debug)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> ChangeFeed {
        let (sender, _) = broadcast::channel(capacity.max(1));
        ChangeFeed { sender }
    }

    /// Publishes a committed change; returns how many subscriptions were listening.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        match self.sender.send(event) {
            Ok(listeners) => listeners,
            Err(_) => {
                debug!("no subscriptions for change notification");
                0
            }
        }
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        Subscription {
            filter,
            receiver: self.sender.subscribe(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// One item delivered by a [`Subscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Change(ChangeEvent),
    /// The subscriber fell behind and this many notifications were lost.
    Lagged(u64),
}

/// Cancels a [`Subscription`] from outside the task that consumes it.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    cancelled: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct Subscription {
    filter: ChangeFilter,
    receiver: broadcast::Receiver<ChangeEvent>,
    cancelled: Arc<AtomicBool>,
}

impl Subscription {
    pub fn filter(&self) -> ChangeFilter {
        self.filter
    }

    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            cancelled: self.cancelled.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Waits for the next matching notification. Returns `None` once cancelled or when the
    /// feed is gone.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            if self.is_cancelled() {
                return None;
            }
            let received = self.receiver.recv().await;
            if self.is_cancelled() {
                return None;
            }
            match received {
                Ok(event) if self.filter.matches(&event) => {
                    return Some(Notification::Change(event));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    warn!("subscription {:?} lagged by {missed} notifications", self.filter);
                    return Some(Notification::Lagged(missed));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Matching change events as a stream; lag markers are dropped.
    pub fn into_stream(mut self) -> impl Stream<Item = ChangeEvent> {
        stream! {
            while let Some(notification) = self.next().await {
                if let Notification::Change(event) = notification {
                    yield event;
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
