//! "Interfaces" of the external collaborators the core depends on

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

/// The user a session was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Sends a one-time sign-in link to the given address.
    ///
    /// Returns `Err` if the address is malformed.
    async fn request_link(&self, email: &str) -> Result<()>;

    /// The identity of the active session, if any.
    fn current_session(&self) -> Option<Identity>;

    /// Observes session changes (sign-in, sign-out).
    fn on_session_change(&self) -> watch::Receiver<Option<Identity>>;

    /// Ends the active session. Signing out without a session is not an error.
    async fn sign_out(&self) -> Result<()>;
}
