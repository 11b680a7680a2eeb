//! Passwordless link identity provider, held in process.
//!
//! `request_link` drops a one-time token into an outbox standing in for the mail
//! service; `redeem` exchanges that token for a session.

use crate::core::traits::{Identity, IdentityProvider};
use crate::error::{Error, Result, ValidationError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentLink {
    pub email: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct LinkState {
    /// email -> user id, stable across sign-ins
    accounts: HashMap<String, Uuid>,
    pending: HashMap<String, SentLink>,
    outbox: Vec<SentLink>,
}

impl LinkState {
    fn prune_expired(&mut self, now: DateTime<Utc>) {
        let before = self.pending.len();
        self.pending.retain(|_, link| link.expires_at >= now);
        self.outbox.retain(|link| link.expires_at >= now);
        let pruned = before - self.pending.len();
        if pruned > 0 {
            debug!("pruned {pruned} expired sign-in links");
        }
    }
}

pub struct LinkIdentityProvider {
    state: Mutex<LinkState>,
    session: watch::Sender<Option<Identity>>,
    link_ttl: Duration,
}

impl LinkIdentityProvider {
    pub fn new(link_ttl: Duration) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            state: Mutex::new(LinkState::default()),
            session,
            link_ttl,
        }
    }

    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Links issued and not yet redeemed. Expired ones are dropped on the next request.
    pub fn pending_links(&self) -> usize {
        self.state().pending.len()
    }

    /// Removes and returns the most recent link sent to `email`.
    pub fn take_sent_link(&self, email: &str) -> Option<SentLink> {
        let email = normalize_email(email);
        let mut state = self.state();
        let position = state.outbox.iter().rposition(|link| link.email == email)?;
        Some(state.outbox.remove(position))
    }

    /// Exchanges a link token for a session. Tokens are single-use.
    pub fn redeem(&self, token: &str) -> Result<Identity> {
        let identity = {
            let mut state = self.state();
            let link = state
                .pending
                .remove(token)
                .ok_or_else(|| Error::Identity("unknown or already used link".to_owned()))?;
            if link.expires_at < Utc::now() {
                warn!("expired sign-in link for {}", link.email);
                return Err(Error::Identity("sign-in link has expired".to_owned()));
            }
            let user_id = *state
                .accounts
                .entry(link.email.clone())
                .or_insert_with(Uuid::new_v4);
            Identity {
                user_id,
                email: link.email,
            }
        };

        info!("signed in {}", identity.email);
        self.session.send_replace(Some(identity.clone()));
        Ok(identity)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Accepts `local@domain.tld` shaped addresses without whitespace.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') || email.chars().any(char::is_whitespace) {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

#[async_trait]
impl IdentityProvider for LinkIdentityProvider {
    async fn request_link(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(ValidationError::InvalidEmail(email).into());
        }

        let ttl = chrono::Duration::from_std(self.link_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let now = Utc::now();
        let link = SentLink {
            email: email.clone(),
            token: Uuid::new_v4().simple().to_string(),
            expires_at: now + ttl,
        };

        let mut state = self.state();
        state.prune_expired(now);
        state.pending.insert(link.token.clone(), link.clone());
        state.outbox.push(link);
        info!("sign-in link sent to {email}");
        Ok(())
    }

    fn current_session(&self) -> Option<Identity> {
        self.session.borrow().clone()
    }

    fn on_session_change(&self) -> watch::Receiver<Option<Identity>> {
        self.session.subscribe()
    }

    async fn sign_out(&self) -> Result<()> {
        if let Some(identity) = self.session.send_replace(None) {
            info!("signed out {}", identity.email);
        }
        Ok(())
    }
}
