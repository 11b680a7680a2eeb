//! Everything that lives from login to logout.

use crate::config::ClientConfig;
use crate::core::context::SessionContext;
use crate::core::directory::DirectorySearch;
use crate::core::presence::PresenceTracker;
use crate::core::profile::{ProfileEditor, ensure_profile};
use crate::core::registry::ConversationRegistry;
use crate::core::session::MessagingSession;
use crate::core::traits::IdentityProvider;
use crate::error::{Error, Result};
use crate::infrastructure::entities::Profile;
use crate::infrastructure::traits::ChatStore;
use log::{info, warn};
use std::sync::Arc;

/// The signed-in client. Built by [`ChatClient::login`], torn down by
/// [`ChatClient::logout`].
pub struct ChatClient {
    ctx: SessionContext,
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn ChatStore>,
    profile: Profile,
    registry: Arc<ConversationRegistry>,
    presence: PresenceTracker,
    directory: DirectorySearch,
    session: MessagingSession,
}

impl ChatClient {
    pub async fn login(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn ChatStore>,
        config: Arc<ClientConfig>,
    ) -> Result<ChatClient> {
        let current = identity
            .current_session()
            .ok_or_else(|| Error::Identity("no active session".to_owned()))?;

        let profile = ensure_profile(store.as_ref(), &current).await?;
        let ctx = SessionContext::new(current, config);

        let registry = Arc::new(ConversationRegistry::new(ctx.clone(), store.clone()));
        if let Err(err) = registry.refresh().await {
            warn!("initial conversation list failed: {err}");
        }

        let presence = PresenceTracker::new(ctx.clone(), store.clone());
        if let Err(err) = presence.start().await {
            warn!("presence start failed: {err}");
        }

        let directory = DirectorySearch::new(ctx.clone(), store.clone());
        let session = MessagingSession::new(ctx.clone(), store.clone(), registry.clone());

        info!("{} logged in as {}", ctx.email(), profile.username);
        Ok(ChatClient {
            ctx,
            identity,
            store,
            profile,
            registry,
            presence,
            directory,
            session,
        })
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// The profile as of login.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn directory(&self) -> &DirectorySearch {
        &self.directory
    }

    pub fn session(&self) -> &MessagingSession {
        &self.session
    }

    pub fn profile_editor(&self) -> ProfileEditor {
        ProfileEditor::new(self.ctx.clone(), self.store.clone())
    }

    /// Closes the conversation, stops presence, marks the user offline and signs out.
    pub async fn logout(self) -> Result<()> {
        self.session.close();
        // Hiding waits out a heartbeat in flight, so no later tick can mark us online.
        if let Err(err) = self.presence.set_visible(false).await {
            warn!("could not mark {} offline: {err}", self.ctx.email());
        }
        self.presence.stop();

        self.identity.sign_out().await?;
        info!("{} logged out", self.ctx.email());
        Ok(())
    }
}
