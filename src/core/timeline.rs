//! Ordered, deduplicated message list of the open conversation.

use crate::infrastructure::entities::Message;
use uuid::Uuid;

/// Messages sorted ascending by `(created_at, id)`, unique by id.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<Message>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn get(&self, message_id: Uuid) -> Option<&Message> {
        self.entries.iter().find(|m| m.id == message_id)
    }

    pub fn contains(&self, message_id: Uuid) -> bool {
        self.get(message_id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Replaces every entry with a freshly fetched set.
    pub fn replace(&mut self, mut messages: Vec<Message>) {
        messages.sort_by_key(Message::order_key);
        messages.dedup_by_key(|m| m.id);
        self.entries = messages;
    }

    /// Inserts the message at its ordered position unless its id is already present.
    /// Returns whether it was inserted.
    pub fn merge(&mut self, message: Message) -> bool {
        if self.contains(message.id) {
            return false;
        }
        let key = message.order_key();
        let position = self.entries.partition_point(|m| m.order_key() < key);
        self.entries.insert(position, message);
        true
    }

    /// Replaces the entry with the same id, if present. Returns whether it was replaced.
    pub fn update(&mut self, message: Message) -> bool {
        match self.entries.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                *existing = message;
                true
            }
            None => false,
        }
    }

    /// Inserts or replaces by id.
    pub fn upsert(&mut self, message: Message) {
        if let Some(existing) = self.entries.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
        } else {
            self.merge(message);
        }
    }
}
