//! Error types for the chat session engine.

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by the persistent store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connectivity or query failure.
    #[error("database error: {0}")]
    Database(sqlx::Error),

    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_owned())
            }
            other => StoreError::Database(other),
        }
    }
}

/// Input rejected before any store call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message text is empty")]
    EmptyText,

    #[error("message text is {len} characters long, the maximum is {max}")]
    TooLong { len: usize, max: usize },

    #[error("username must be between 3 and 20 characters")]
    UsernameLength,

    #[error("username may only contain letters, digits and '_'")]
    UsernameCharacters,

    #[error("username {0} is already taken")]
    UsernameTaken(String),

    #[error("group name is empty")]
    MissingGroupName,

    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    #[error("cannot start a conversation with yourself")]
    SelfConversation,
}

/// The store write a [`Error::Write`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    Send,
    Edit,
    Delete,
}

impl fmt::Display for WriteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteAction::Send => "send",
            WriteAction::Edit => "edit",
            WriteAction::Delete => "delete",
        })
    }
}

/// Main error type of the crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// The caller does not own the row it tried to change.
    #[error("not permitted: {0}")]
    Unauthorized(String),

    /// A read failed; the caller may retry.
    #[error("could not load {what}: {source}")]
    Load {
        what: &'static str,
        #[source]
        source: StoreError,
    },

    /// A message write failed; nothing was retried.
    #[error("could not {action} message: {source}")]
    Write {
        action: WriteAction,
        #[source]
        source: StoreError,
    },

    /// Any other store failure (registry, presence, profile writes).
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no conversation is open")]
    NotOpen,

    /// The conversation was switched away while the operation was in flight.
    #[error("conversation {0} is no longer open")]
    Stale(Uuid),

    #[error("message {0} not found")]
    MessageNotFound(Uuid),

    #[error("identity error: {0}")]
    Identity(String),
}

impl Error {
    pub(crate) fn load(what: &'static str) -> impl FnOnce(StoreError) -> Error {
        move |source| Error::Load { what, source }
    }

    pub(crate) fn write(action: WriteAction) -> impl FnOnce(StoreError) -> Error {
        move |source| Error::Write { action, source }
    }

    /// Whether re-invoking the same operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Load { .. } | Error::Write { .. } | Error::Store(StoreError::Database(_))
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
