use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::crypto::token::generate_session_id;
use crate::error::Result;
use crate::session::container::{SessionContainer, StoredContainer};

/// Persistence for session containers.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads a container, `None` when missing or past its expiry date.
    async fn load(&self, id: &str) -> Result<Option<SessionContainer>>;

    /// Writes the container, issuing a fresh identifier first if it has none.
    ///
    /// A container that already has an identifier is only updated in place.
    /// Returns `false`, writing nothing, when that identifier is no longer
    /// stored (revoked or expired while the request held the container).
    async fn save(&self, container: &mut SessionContainer) -> Result<bool>;

    /// Deletes a container. Deleting a missing id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Whether a live container is stored under `id`.
    async fn exists(&self, id: &str) -> Result<bool>;

    /// End-of-request bookkeeping: drops ids abandoned by `flush`/`cycle_id`,
    /// then saves a modified container or deletes one that was emptied.
    ///
    /// A container whose stored copy disappeared mid-request is detached
    /// instead of being written back, so it ends up without an identifier.
    async fn persist(&self, container: &mut SessionContainer) -> Result<()> {
        for id in container.take_discarded() {
            self.delete(&id).await?;
        }

        if !container.is_modified() {
            return Ok(());
        }

        if container.is_empty() {
            if let Some(id) = container.identifier() {
                let id = id.to_string();
                self.delete(&id).await?;
            }
            container.mark_saved();
            return Ok(());
        }

        if !self.save(container).await? {
            tracing::info!("🚫 Session container was removed during the request, dropping it");
            container.detach();
        }

        Ok(())
    }
}

/// In-process container store, used by tests and single-node setups.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    containers: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored containers.
    pub async fn len(&self) -> usize {
        self.containers.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionContainer>> {
        let containers = self.containers.read().await;
        let Some(raw) = containers.get(id) else {
            return Ok(None);
        };

        let stored: StoredContainer = sonic_rs::from_str(raw)?;
        if stored.expire_date <= chrono::Utc::now() {
            return Ok(None);
        }

        Ok(Some(SessionContainer::from_stored(id.to_string(), stored)))
    }

    async fn save(&self, container: &mut SessionContainer) -> Result<bool> {
        let raw = sonic_rs::to_string(&container.to_stored())?;
        let mut containers = self.containers.write().await;

        let id = match container.identifier() {
            Some(id) if !containers.contains_key(id) => return Ok(false),
            Some(id) => id.to_string(),
            None => {
                let mut id = generate_session_id();
                while containers.contains_key(&id) {
                    id = generate_session_id();
                }
                container.assign_identifier(id.clone());
                id
            }
        };

        containers.insert(id, raw);
        container.mark_saved();
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.containers.write().await.remove(id);
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.load(id).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn fresh() -> SessionContainer {
        SessionContainer::new(Utc::now() + Duration::days(1))
    }

    #[tokio::test]
    async fn test_save_materializes_identifier() {
        let store = MemorySessionStore::new();
        let mut container = fresh();
        assert!(container.identifier().is_none());

        store.save(&mut container).await.unwrap();

        let id = container.identifier().unwrap().to_string();
        assert!(store.exists(&id).await.unwrap());
        assert!(!container.is_modified());
    }

    #[tokio::test]
    async fn test_load_restores_data() {
        let store = MemorySessionStore::new();
        let mut container = fresh();
        container.set_serialized("theme", "dark").unwrap();
        store.save(&mut container).await.unwrap();

        let id = container.identifier().unwrap();
        let loaded = store.load(id).await.unwrap().unwrap();

        assert_eq!(loaded.get_deserialized::<String>("theme").as_deref(), Some("dark"));
    }

    #[tokio::test]
    async fn test_expired_container_is_not_loaded() {
        let store = MemorySessionStore::new();
        let mut container = SessionContainer::new(Utc::now() - Duration::seconds(1));
        container.set_serialized("k", "v").unwrap();
        store.save(&mut container).await.unwrap();

        let id = container.identifier().unwrap();
        assert!(store.load(id).await.unwrap().is_none());
        assert!(!store.exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_persist_after_cycle_id_replaces_old_entry() {
        let store = MemorySessionStore::new();
        let mut container = fresh();
        container.set_serialized("k", "v").unwrap();
        store.save(&mut container).await.unwrap();
        let old_id = container.identifier().unwrap().to_string();

        container.cycle_id();
        store.persist(&mut container).await.unwrap();

        let new_id = container.identifier().unwrap().to_string();
        assert_ne!(old_id, new_id);
        assert!(!store.exists(&old_id).await.unwrap());
        assert!(store.exists(&new_id).await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_persist_after_flush_leaves_nothing_behind() {
        let store = MemorySessionStore::new();
        let mut container = fresh();
        container.set_serialized("k", "v").unwrap();
        store.save(&mut container).await.unwrap();

        container.flush();
        store.persist(&mut container).await.unwrap();

        assert!(container.identifier().is_none());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_save_does_not_recreate_deleted_container() {
        let store = MemorySessionStore::new();
        let mut container = fresh();
        container.set_serialized("k", "v").unwrap();
        assert!(store.save(&mut container).await.unwrap());
        let id = container.identifier().unwrap().to_string();

        store.delete(&id).await.unwrap();
        container.set_serialized("k", "v2").unwrap();

        assert!(!store.save(&mut container).await.unwrap());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_persist_drops_container_deleted_mid_request() {
        let store = MemorySessionStore::new();
        let mut container = fresh();
        container.set_serialized("k", "v").unwrap();
        store.save(&mut container).await.unwrap();
        let id = container.identifier().unwrap().to_string();

        let mut inflight = store.load(&id).await.unwrap().unwrap();
        store.delete(&id).await.unwrap();
        inflight.set_serialized("k", "v2").unwrap();
        store.persist(&mut inflight).await.unwrap();

        assert!(inflight.identifier().is_none());
        assert!(inflight.is_empty());
        assert!(!store.exists(&id).await.unwrap());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_persist_skips_untouched_container() {
        let store = MemorySessionStore::new();
        let mut container = fresh();

        store.persist(&mut container).await.unwrap();

        assert!(container.identifier().is_none());
        assert_eq!(store.len().await, 0);
    }
}
