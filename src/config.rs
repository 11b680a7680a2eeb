//! Client configuration, read from the environment.

use log::warn;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const HISTORY_LIMIT: &str = "CHAT_HISTORY_LIMIT";
pub const MAX_MESSAGE_LEN: &str = "CHAT_MAX_MESSAGE_LEN";
pub const PREVIEW_LEN: &str = "CHAT_PREVIEW_LEN";
pub const SEARCH_LIMIT: &str = "CHAT_SEARCH_LIMIT";
pub const ROSTER_LIMIT: &str = "CHAT_ROSTER_LIMIT";
pub const HEARTBEAT_SECS: &str = "CHAT_HEARTBEAT_SECS";
pub const LINK_TTL_SECS: &str = "CHAT_LINK_TTL_SECS";
pub const FEED_CAPACITY: &str = "CHAT_FEED_CAPACITY";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub database_url: String,
    /// Messages fetched when a conversation is opened or reloaded.
    pub history_limit: u32,
    /// Maximum message length, in characters.
    pub max_message_len: usize,
    /// Maximum length of a conversation's last-message preview, in characters.
    pub preview_len: usize,
    pub search_limit: u32,
    pub roster_limit: u32,
    pub heartbeat_interval: Duration,
    pub link_ttl: Duration,
    /// Buffered change notifications per subscriber before it lags.
    pub feed_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_owned(),
            history_limit: 50,
            max_message_len: 2000,
            preview_len: 30,
            search_limit: 15,
            roster_limit: 15,
            heartbeat_interval: Duration::from_secs(30),
            link_ttl: Duration::from_secs(5 * 60),
            feed_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Loads `.env` if present, then applies `DATABASE_URL` and `CHAT_*` overrides on top of
    /// the defaults.
    pub fn from_env() -> ClientConfig {
        dotenvy::dotenv().ok();
        let defaults = ClientConfig::default();

        ClientConfig {
            database_url: env::var(DATABASE_URL).unwrap_or(defaults.database_url),
            history_limit: env_or(HISTORY_LIMIT, defaults.history_limit),
            max_message_len: env_or(MAX_MESSAGE_LEN, defaults.max_message_len),
            preview_len: env_or(PREVIEW_LEN, defaults.preview_len),
            search_limit: env_or(SEARCH_LIMIT, defaults.search_limit),
            roster_limit: env_or(ROSTER_LIMIT, defaults.roster_limit),
            heartbeat_interval: Duration::from_secs(env_where(
                HEARTBEAT_SECS,
                defaults.heartbeat_interval.as_secs(),
                |secs| *secs > 0,
            )),
            link_ttl: Duration::from_secs(env_or(LINK_TTL_SECS, defaults.link_ttl.as_secs())),
            feed_capacity: env_where(FEED_CAPACITY, defaults.feed_capacity, |n| *n > 0),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env_where(key, default, |_| true)
}

/// Like [`env_or`], but values rejected by `accept` also fall back to `default`.
fn env_where<T: FromStr>(key: &str, default: T, accept: impl Fn(&T) -> bool) -> T {
    match env::var(key) {
        Ok(raw) => match T::from_str(raw.trim()) {
            Ok(value) if accept(&value) => value,
            _ => {
                warn!("ignoring invalid value {raw:?} for {key}");
                default
            }
        },
        Err(_) => default,
    }
}
