use futures::stream::{self, StreamExt};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::session_record::SessionRecord,
    repositories::session_record::SessionRecordRepository,
    session::store::SessionStore,
};

/// Concurrent container lookups during an orphan sweep.
const SWEEP_CONCURRENCY: usize = 16;

/// User-facing session management: listing, revoking and cleanup.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    records: Arc<dyn SessionRecordRepository>,
}

impl SessionManager {
    pub fn new(sessions: Arc<dyn SessionStore>, records: Arc<dyn SessionRecordRepository>) -> Self {
        Self { sessions, records }
    }

    /// The user's session records, newest first.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<SessionRecord>> {
        self.records.list_for_user(user_id).await
    }

    /// Ends one of the user's sessions: its container goes, and its record with it.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The user asking for the revocation.
    /// * `container_id` - The session to end.
    ///
    /// # Errors
    ///
    /// `NotFound` when the user owns no session with that id.
    pub async fn revoke(&self, user_id: Uuid, container_id: &str) -> Result<()> {
        if self
            .records
            .find_by_container(user_id, container_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound);
        }

        self.sessions.delete(container_id).await?;
        self.records.delete_by_container(container_id).await?;

        tracing::info!("🗑️ Session revoked for user {}", user_id);
        Ok(())
    }

    /// Deletes records whose container no longer exists.
    ///
    /// # Returns
    ///
    /// The number of records deleted.
    pub async fn prune_orphans(&self) -> Result<usize> {
        let container_ids = self.records.container_ids().await?;

        let checks: Vec<(String, Result<bool>)> = stream::iter(container_ids)
            .map(|id| {
                let sessions = Arc::clone(&self.sessions);
                async move {
                    let alive = sessions.exists(&id).await;
                    (id, alive)
                }
            })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        let mut pruned = 0;
        for (id, alive) in checks {
            if !alive? && self.records.delete_by_container(&id).await? {
                pruned += 1;
            }
        }

        Ok(pruned)
    }
}
