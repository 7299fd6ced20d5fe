use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use speakin_types::UserId;
use speakin_types::models::{Counterpart, Message};

use crate::client::Backend;
use crate::error::{EnrichmentError, NetworkError};

/// Outcome of a roster load. Individual profile lookups may fail without
/// affecting the others.
#[derive(Debug, Default)]
pub struct RosterLoad {
    pub resolved: Vec<Counterpart>,
    pub failures: Vec<EnrichmentError>,
}

/// Loads conversation history and the list of known counterparts.
#[derive(Clone)]
pub struct HistoryLoader {
    backend: Arc<dyn Backend>,
}

impl HistoryLoader {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Full history for the pair, in server order (oldest first).
    pub async fn load_history(
        &self,
        user_id: UserId,
        counterpart_id: UserId,
    ) -> Result<Vec<Message>, NetworkError> {
        let history = self.backend.history(user_id, counterpart_id).await?;
        debug!(
            "Loaded {} messages for {} <-> {}",
            history.len(),
            user_id,
            counterpart_id
        );
        Ok(history)
    }

    /// Resolve every chat partner of `user_id` to a profile.
    ///
    /// Ids in `known` (already in the roster, e.g. from a deep link) and the
    /// user's own id are skipped. Lookups run concurrently; failures are
    /// collected per id.
    pub async fn load_roster(
        &self,
        user_id: UserId,
        known: &[UserId],
    ) -> Result<RosterLoad, NetworkError> {
        let ids = self.backend.chat_users(user_id).await?;

        let mut seen: HashSet<UserId> = known.iter().copied().collect();
        seen.insert(user_id);
        let pending: Vec<UserId> = ids.into_iter().filter(|id| seen.insert(*id)).collect();

        let results = join_all(pending.iter().map(|&id| self.resolve_counterpart(id))).await;

        let mut load = RosterLoad::default();
        for result in results {
            match result {
                Ok(counterpart) => load.resolved.push(counterpart),
                Err(err) => {
                    warn!("Roster lookup failed: {}", err);
                    load.failures.push(err);
                }
            }
        }

        info!(
            "Roster for {}: {} resolved, {} failed",
            user_id,
            load.resolved.len(),
            load.failures.len()
        );
        Ok(load)
    }

    pub async fn resolve_counterpart(&self, id: UserId) -> Result<Counterpart, EnrichmentError> {
        self.backend
            .user(id)
            .await
            .map(Counterpart::from)
            .map_err(|source| EnrichmentError {
                user_id: id,
                source,
            })
    }
}
