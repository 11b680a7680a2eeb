//! Profile bootstrap and editing.

use crate::core::context::SessionContext;
use crate::core::traits::Identity;
use crate::error::{Error, Result, StoreError, ValidationError};
use crate::infrastructure::entities::{Profile, ProfilePatch};
use crate::infrastructure::traits::ChatStore;
use chrono::Utc;
use log::{debug, info};
use std::sync::Arc;
use uuid::Uuid;

/// Status shown for users who never set one.
pub const DEFAULT_STATUS: &str = "Online";

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 20;

const CREATE_ATTEMPTS: usize = 3;

fn is_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn validate_username(username: &str) -> std::result::Result<(), ValidationError> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(ValidationError::UsernameLength);
    }
    if !username.chars().all(is_username_char) {
        return Err(ValidationError::UsernameCharacters);
    }
    Ok(())
}

/// Derives a valid username from the local part of an email address.
pub fn username_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let mut username: String = local
        .chars()
        .map(|c| if is_username_char(c) { c } else { '_' })
        .take(USERNAME_MAX)
        .collect();

    if username.is_empty() {
        return format!("user_{}", short_suffix(8));
    }
    while username.chars().count() < USERNAME_MIN {
        username.push('_');
    }
    username
}

fn short_suffix(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_owned()
}

/// `base` shortened so that `base_xxxx` still fits the length limit.
fn with_suffix(base: &str) -> String {
    let stem: String = base.chars().take(USERNAME_MAX - 5).collect();
    format!("{stem}_{}", short_suffix(4))
}

/// Creates the signed-in user's profile on first login; afterwards just marks it online.
pub async fn ensure_profile(store: &dyn ChatStore, identity: &Identity) -> Result<Profile> {
    let now = Utc::now();
    if store.find_profile(identity.user_id).await?.is_some() {
        let profile = store
            .update_profile(identity.user_id, ProfilePatch::online(now))
            .await?
            .ok_or_else(|| Error::Identity(format!("profile {} vanished", identity.user_id)))?;
        debug!("welcome back {}", profile.username);
        return Ok(profile);
    }

    let base = username_from_email(&identity.email);
    let mut username = base.clone();
    let mut attempt = 1;
    loop {
        let profile = Profile {
            id: identity.user_id,
            email: identity.email.clone(),
            username: username.clone(),
            status: DEFAULT_STATUS.to_owned(),
            is_online: true,
            last_seen: Some(now),
            created_at: now,
            updated_at: None,
        };

        match store.insert_profile(profile).await {
            Ok(profile) => {
                info!("created profile {} for {}", profile.username, profile.email);
                return Ok(profile);
            }
            Err(StoreError::Conflict(reason)) if attempt < CREATE_ATTEMPTS => {
                debug!("username {username} unavailable ({reason}), retrying");
                username = with_suffix(&base);
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

pub struct ProfileEditor {
    ctx: SessionContext,
    store: Arc<dyn ChatStore>,
}

impl ProfileEditor {
    pub fn new(ctx: SessionContext, store: Arc<dyn ChatStore>) -> Self {
        Self { ctx, store }
    }

    pub async fn current(&self) -> Result<Option<Profile>> {
        self.store
            .find_profile(self.ctx.user_id())
            .await
            .map_err(Error::load("profile"))
    }

    /// Validates `username` and checks no other user has it.
    pub async fn check_username(&self, username: &str) -> Result<()> {
        validate_username(username)?;
        let taken = self
            .store
            .find_profile_by_username(username, self.ctx.user_id())
            .await
            .map_err(Error::load("profile"))?;
        match taken {
            Some(_) => Err(ValidationError::UsernameTaken(username.to_owned()).into()),
            None => Ok(()),
        }
    }

    pub async fn save(&self, username: &str, status: &str) -> Result<Profile> {
        let username = username.trim();
        self.check_username(username).await?;

        let status = match status.trim() {
            "" => DEFAULT_STATUS,
            status => status,
        };
        let patch = ProfilePatch {
            username: Some(username.to_owned()),
            status: Some(status.to_owned()),
            updated_at: Some(Utc::now()),
            ..ProfilePatch::default()
        };

        let profile = match self.store.update_profile(self.ctx.user_id(), patch).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                return Err(Error::Identity(format!(
                    "no profile for {}",
                    self.ctx.email()
                )));
            }
            // Someone claimed the name between the check and the write.
            Err(StoreError::Conflict(_)) => {
                return Err(ValidationError::UsernameTaken(username.to_owned()).into());
            }
            Err(err) => return Err(err.into()),
        };
        info!("profile of {} saved as {}", self.ctx.email(), profile.username);
        Ok(profile)
    }
}
