//! User directory search.

use crate::core::context::SessionContext;
use crate::error::{Error, Result};
use crate::infrastructure::entities::Profile;
use crate::infrastructure::traits::ChatStore;
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct DirectorySearch {
    ctx: SessionContext,
    store: Arc<dyn ChatStore>,
    results: Mutex<Vec<Profile>>,
}

impl DirectorySearch {
    pub fn new(ctx: SessionContext, store: Arc<dyn ChatStore>) -> Self {
        Self {
            ctx,
            store,
            results: Mutex::new(Vec::new()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, Vec<Profile>> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Profiles other than the signed-in user whose username or email contains `query`,
    /// ignoring case. A blank query clears the results without touching the store.
    pub async fn search(&self, query: &str) -> Result<Vec<Profile>> {
        let query = query.trim();
        if query.is_empty() {
            self.clear();
            return Ok(Vec::new());
        }

        let found = self
            .store
            .search_profiles(query, self.ctx.user_id(), self.ctx.config().search_limit)
            .await
            .map_err(Error::load("search results"))?;
        debug!("{} profiles match {query:?}", found.len());

        *self.cache() = found.clone();
        Ok(found)
    }

    pub fn clear(&self) {
        self.cache().clear();
    }

    pub fn results(&self) -> Vec<Profile> {
        self.cache().clone()
    }
}
