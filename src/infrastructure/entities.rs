//! Database entities

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Content stored in place of a soft-deleted message's text.
pub const TOMBSTONE: &str = "[Message deleted]";

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub status: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial update of a profile row; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub username: Option<String>,
    pub status: Option<String>,
    pub is_online: Option<bool>,
    pub last_seen: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProfilePatch {
    pub fn online(at: DateTime<Utc>) -> Self {
        Self {
            is_online: Some(true),
            last_seen: Some(at),
            ..Self::default()
        }
    }

    pub fn offline() -> Self {
        Self {
            is_online: Some(false),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Personal = 1,
    Group = 2,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Chat {
    pub id: Uuid,
    pub kind: ChatKind,
    pub name: Option<String>,
    #[serde(skip)]
    pub pair_key: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn personal(first: Uuid, second: Uuid, created_at: DateTime<Utc>) -> Chat {
        Chat {
            id: Uuid::now_v7(),
            kind: ChatKind::Personal,
            name: None,
            pair_key: Some(pair_key(first, second)),
            last_message: None,
            last_message_at: None,
            created_at,
        }
    }

    pub fn group(name: String, created_at: DateTime<Utc>) -> Chat {
        Chat {
            id: Uuid::now_v7(),
            kind: ChatKind::Group,
            name: Some(name),
            pair_key: None,
            last_message: None,
            last_message_at: None,
            created_at,
        }
    }
}

/// Order-independent key identifying the personal chat between two users.
pub fn pair_key(first: Uuid, second: Uuid) -> String {
    let (low, high) = if first <= second {
        (first, second)
    } else {
        (second, first)
    };
    format!("{low}:{high}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize)]
#[repr(u8)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Member = 1,
    Admin = 2,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct ChatMember {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

/// A chat as seen through one user's membership row.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Membership {
    #[sqlx(flatten)]
    pub chat: Chat,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(chat_id: Uuid, sender_id: Uuid, content: String) -> Message {
        Message {
            id: Uuid::now_v7(),
            chat_id,
            sender_id,
            content,
            created_at: Utc::now(),
            is_edited: false,
            is_deleted: false,
            updated_at: None,
            deleted_at: None,
        }
    }

    /// Timeline ordering key.
    pub fn order_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }
}

/// In-place mutation of a message row, applied only to rows sent by the caller.
#[derive(Debug, Clone)]
pub enum MessagePatch {
    Edit { content: String, at: DateTime<Utc> },
    Delete { at: DateTime<Utc> },
}
