//! Per-login session context shared by the core components.

use crate::config::ClientConfig;
use crate::core::traits::Identity;
use std::sync::Arc;
use uuid::Uuid;

/// Who is signed in and under which limits. Created at login, dropped at logout.
#[derive(Debug, Clone)]
pub struct SessionContext {
    identity: Identity,
    config: Arc<ClientConfig>,
}

impl SessionContext {
    pub fn new(identity: Identity, config: Arc<ClientConfig>) -> Self {
        Self { identity, config }
    }

    pub fn user_id(&self) -> Uuid {
        self.identity.user_id
    }

    pub fn email(&self) -> &str {
        &self.identity.email
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
