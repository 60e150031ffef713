use std::sync::Arc;
use uuid::Uuid;

use crate::{
    clock::Clock,
    error::Result,
    repositories::session_record::SessionRecordRepository,
};

/// Stamps `last_activity` on the record of the session making a request.
#[derive(Clone)]
pub struct ActivityTracker {
    records: Arc<dyn SessionRecordRepository>,
    clock: Arc<dyn Clock>,
}

impl ActivityTracker {
    pub fn new(records: Arc<dyn SessionRecordRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { records, clock }
    }

    /// Records activity for the current request.
    ///
    /// Anonymous requests and sessions without a record are skipped.
    ///
    /// # Returns
    ///
    /// Whether a record was updated.
    pub async fn track(&self, user_id: Option<Uuid>, container_id: Option<&str>) -> Result<bool> {
        let (Some(user_id), Some(container_id)) = (user_id, container_id) else {
            return Ok(false);
        };

        let updated = self
            .records
            .touch(user_id, container_id, self.clock.now())
            .await?;

        if !updated {
            tracing::debug!("No session record for user {} on this container", user_id);
        }

        Ok(updated)
    }
}
