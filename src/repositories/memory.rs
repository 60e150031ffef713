use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::session_record::{NewSessionRecord, SessionRecord},
    repositories::session_record::SessionRecordRepository,
};

/// In-process [`SessionRecordRepository`], keyed by container id.
#[derive(Clone, Default)]
pub struct MemorySessionRecordRepository {
    records: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl MemorySessionRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across all users.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    fn count(records: &HashMap<String, SessionRecord>, user_id: Uuid) -> u64 {
        records.values().filter(|r| r.user_id == user_id).count() as u64
    }

    fn insert_into(
        records: &mut HashMap<String, SessionRecord>,
        record: NewSessionRecord,
    ) -> Result<SessionRecord> {
        if records.contains_key(&record.container_id) {
            return Err(AppError::Conflict(format!(
                "Session record already exists for container {}",
                record.container_id
            )));
        }

        let record = record.into_record();
        records.insert(record.container_id.clone(), record.clone());
        Ok(record)
    }
}

#[async_trait]
impl SessionRecordRepository for MemorySessionRecordRepository {
    async fn count_for_user(&self, user_id: Uuid) -> Result<u64> {
        Ok(Self::count(&*self.records.read().await, user_id))
    }

    async fn insert(&self, record: NewSessionRecord) -> Result<SessionRecord> {
        Self::insert_into(&mut *self.records.write().await, record)
    }

    async fn insert_within_limit(
        &self,
        record: NewSessionRecord,
        max_sessions: u64,
    ) -> Result<Option<SessionRecord>> {
        let mut records = self.records.write().await;
        if Self::count(&records, record.user_id) >= max_sessions {
            return Ok(None);
        }
        Self::insert_into(&mut records, record).map(Some)
    }

    async fn find_by_container(
        &self,
        user_id: Uuid,
        container_id: &str,
    ) -> Result<Option<SessionRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(container_id)
            .filter(|r| r.user_id == user_id)
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<SessionRecord>> {
        let mut records: Vec<SessionRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn touch(&self, user_id: Uuid, container_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(container_id) {
            Some(record) if record.user_id == user_id => {
                record.last_activity = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_by_container(&self, container_id: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(container_id).is_some())
    }

    async fn container_ids(&self) -> Result<Vec<String>> {
        Ok(self.records.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session_record::{DeviceDescriptor, GeoDescriptor};
    use std::net::{IpAddr, Ipv4Addr};

    fn new_record(user_id: Uuid, container_id: &str) -> NewSessionRecord {
        NewSessionRecord {
            user_id,
            container_id: container_id.to_string(),
            geo: GeoDescriptor {
                ip_address: IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
                city: None,
                country: None,
            },
            device: DeviceDescriptor {
                browser_info: "Chrome 120.0.0".to_string(),
                device_info: "Other Windows 10".to_string(),
            },
            created_at: Utc::now(),
            last_activity: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_container_id_is_unique() {
        let repo = MemorySessionRecordRepository::new();
        let user = Uuid::new_v4();

        repo.insert(new_record(user, "c1")).await.unwrap();
        let duplicate = repo.insert(new_record(Uuid::new_v4(), "c1")).await;

        assert!(matches!(duplicate, Err(AppError::Conflict(_))));
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_insert_within_limit_stops_at_max() {
        let repo = MemorySessionRecordRepository::new();
        let user = Uuid::new_v4();

        for i in 0..3 {
            let inserted = repo
                .insert_within_limit(new_record(user, &format!("c{}", i)), 3)
                .await
                .unwrap();
            assert!(inserted.is_some());
        }

        let refused = repo.insert_within_limit(new_record(user, "c3"), 3).await.unwrap();
        assert!(refused.is_none());
        assert_eq!(repo.count_for_user(user).await.unwrap(), 3);

        let other = repo
            .insert_within_limit(new_record(Uuid::new_v4(), "c4"), 3)
            .await
            .unwrap();
        assert!(other.is_some());
    }

    #[tokio::test]
    async fn test_touch_requires_matching_owner() {
        let repo = MemorySessionRecordRepository::new();
        let owner = Uuid::new_v4();
        repo.insert(new_record(owner, "c1")).await.unwrap();
        let now = Utc::now();

        assert!(!repo.touch(Uuid::new_v4(), "c1", now).await.unwrap());
        assert!(!repo.touch(owner, "missing", now).await.unwrap());
        assert!(repo.touch(owner, "c1", now).await.unwrap());

        let record = repo.find_by_container(owner, "c1").await.unwrap().unwrap();
        assert_eq!(record.last_activity, Some(now));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let repo = MemorySessionRecordRepository::new();
        let user = Uuid::new_v4();
        repo.insert(new_record(user, "a")).await.unwrap();
        repo.insert(new_record(user, "b")).await.unwrap();
        repo.insert(new_record(Uuid::new_v4(), "c")).await.unwrap();

        assert_eq!(repo.list_for_user(user).await.unwrap().len(), 2);
        assert!(repo.delete_by_container("a").await.unwrap());
        assert!(!repo.delete_by_container("a").await.unwrap());
        assert_eq!(repo.list_for_user(user).await.unwrap().len(), 1);

        let mut ids = repo.container_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
    }
}
