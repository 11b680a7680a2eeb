//! Presence: this user's liveness heartbeat and the roster of others online.

use crate::config::ClientConfig;
use crate::core::context::SessionContext;
use crate::error::{Error, Result};
use crate::infrastructure::entities::{Profile, ProfilePatch};
use crate::infrastructure::traits::ChatStore;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

struct PresenceInner {
    ctx: SessionContext,
    store: Arc<dyn ChatStore>,
    roster: Mutex<Vec<Profile>>,
    visible: AtomicBool,
    /// Held across a visibility check and the write that depends on it.
    writes: tokio::sync::Mutex<()>,
}

impl PresenceInner {
    fn roster(&self) -> MutexGuard<'_, Vec<Profile>> {
        self.roster.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn mark_online(&self) -> Result<()> {
        self.store
            .update_profile(self.ctx.user_id(), ProfilePatch::online(Utc::now()))
            .await?;
        Ok(())
    }

    async fn refresh_roster(&self) -> Result<Vec<Profile>> {
        let online = self
            .store
            .list_online_profiles(self.ctx.user_id(), self.ctx.config().roster_limit)
            .await
            .map_err(Error::load("roster"))?;

        *self.roster() = online.clone();
        Ok(online)
    }

    async fn heartbeat(&self) -> Result<()> {
        let _writing = self.writes.lock().await;
        if !self.visible.load(Ordering::SeqCst) {
            debug!("hidden, skipping heartbeat");
            return Ok(());
        }
        self.mark_online().await?;
        self.refresh_roster().await?;
        Ok(())
    }
}

/// Owns the periodic heartbeat task; dropping the tracker stops it.
pub struct PresenceTracker {
    inner: Arc<PresenceInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceTracker {
    pub fn new(ctx: SessionContext, store: Arc<dyn ChatStore>) -> Self {
        Self {
            inner: Arc::new(PresenceInner {
                ctx,
                store,
                roster: Mutex::new(Vec::new()),
                visible: AtomicBool::new(true),
                writes: tokio::sync::Mutex::new(()),
            }),
            task: Mutex::new(None),
        }
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the user online, loads the roster and starts the heartbeat.
    ///
    /// The heartbeat is started even when the initial update fails.
    pub async fn start(&self) -> Result<()> {
        self.inner.visible.store(true, Ordering::SeqCst);
        let initial = match self.inner.mark_online().await {
            Ok(()) => self.inner.refresh_roster().await.map(|_| ()),
            Err(err) => Err(err),
        };

        let mut period = self.inner.ctx.config().heartbeat_interval;
        if period.is_zero() {
            warn!("zero heartbeat interval, using the default");
            period = ClientConfig::default().heartbeat_interval;
        }
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; `start` already did that round.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = inner.heartbeat().await {
                    error!("presence heartbeat failed: {err}");
                }
            }
        });

        if let Some(previous) = self.task().replace(task) {
            previous.abort();
        }
        info!(
            "presence started for {} (every {:?})",
            self.inner.ctx.email(),
            period
        );
        initial
    }

    /// One heartbeat round. Does nothing while hidden.
    pub async fn heartbeat(&self) -> Result<()> {
        self.inner.heartbeat().await
    }

    /// Hiding marks the user offline right away; showing marks them online again and
    /// re-reads the roster.
    pub async fn set_visible(&self, visible: bool) -> Result<()> {
        let _writing = self.inner.writes.lock().await;
        self.inner.visible.store(visible, Ordering::SeqCst);
        if visible {
            self.inner.mark_online().await?;
            self.inner.refresh_roster().await?;
        } else {
            self.inner
                .store
                .update_profile(self.inner.ctx.user_id(), ProfilePatch::offline())
                .await?;
        }
        debug!("visibility set to {visible}");
        Ok(())
    }

    pub fn is_visible(&self) -> bool {
        self.inner.visible.load(Ordering::SeqCst)
    }

    pub async fn refresh_roster(&self) -> Result<Vec<Profile>> {
        self.inner.refresh_roster().await
    }

    /// Other users online as of the last refresh, most recently seen first.
    pub fn roster(&self) -> Vec<Profile> {
        self.inner.roster().clone()
    }

    /// Cancels the heartbeat. No update is attempted after this returns.
    pub fn stop(&self) {
        if let Some(task) = self.task().take() {
            task.abort();
            info!("presence stopped for {}", self.inner.ctx.email());
        }
    }

    pub fn is_running(&self) -> bool {
        self.task().as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        if let Some(task) = self.task().take() {
            warn!("presence tracker dropped without stop");
            task.abort();
        }
    }
}
