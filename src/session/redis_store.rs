use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::crypto::token::generate_session_id;
use crate::error::Result;
use crate::session::container::{SessionContainer, StoredContainer};
use crate::session::store::SessionStore;

/// How many times to draw a new id when `SET NX` finds it taken.
const MAX_CREATE_ATTEMPTS: usize = 8;

/// Container store backed by Redis, one JSON blob per `session:{id}` key.
///
/// Keys carry a TTL matching the container's expiry date, so Redis drops
/// abandoned containers on its own.
#[derive(Clone)]
pub struct RedisSessionStore {
    redis: ConnectionManager,
}

impl RedisSessionStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn key(id: &str) -> String {
        format!("session:{}", id)
    }

    fn ttl_seconds(container: &SessionContainer) -> u64 {
        (container.expire_date() - Utc::now()).num_seconds().max(1) as u64
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionContainer>> {
        let mut redis = self.redis.clone();
        let raw: Option<String> = redis.get(Self::key(id)).await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let stored: StoredContainer = match sonic_rs::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("❌ Corrupt session blob for {}: {}", id, e);
                return Ok(None);
            }
        };

        if stored.expire_date <= Utc::now() {
            return Ok(None);
        }

        Ok(Some(SessionContainer::from_stored(id.to_string(), stored)))
    }

    async fn save(&self, container: &mut SessionContainer) -> Result<bool> {
        let raw = sonic_rs::to_string(&container.to_stored())?;
        let ttl = Self::ttl_seconds(container);
        let mut redis = self.redis.clone();

        if let Some(id) = container.identifier() {
            let updated: Option<String> = redis::cmd("SET")
                .arg(Self::key(id))
                .arg(&raw)
                .arg("XX")
                .arg("EX")
                .arg(ttl)
                .query_async(&mut redis)
                .await?;

            if updated.is_none() {
                tracing::debug!("🔑 Session container {} no longer stored", id);
                return Ok(false);
            }

            container.mark_saved();
            return Ok(true);
        }

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let id = generate_session_id();
            let created: Option<String> = redis::cmd("SET")
                .arg(Self::key(&id))
                .arg(&raw)
                .arg("NX")
                .arg("EX")
                .arg(ttl)
                .query_async(&mut redis)
                .await?;

            if created.is_some() {
                tracing::debug!("🔑 Created session container {}", id);
                container.assign_identifier(id);
                container.mark_saved();
                return Ok(true);
            }
        }

        Err(crate::error::AppError::Internal(
            "Unable to allocate a unique session id".to_string(),
        ))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut redis = self.redis.clone();
        let _: () = redis.del(Self::key(id)).await?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let mut redis = self.redis.clone();
        let exists: bool = redis.exists(Self::key(id)).await?;
        Ok(exists)
    }
}
