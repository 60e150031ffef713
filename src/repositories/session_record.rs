use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::session_record::{NewSessionRecord, SessionRecord, SESSION_RECORD_COLUMNS},
};

/// Persistence for [`SessionRecord`]s.
#[async_trait]
pub trait SessionRecordRepository: Send + Sync {
    /// Counts every record the user owns, expired or not.
    async fn count_for_user(&self, user_id: Uuid) -> Result<u64>;

    /// Inserts a record.
    ///
    /// # Errors
    ///
    /// `Conflict` when a record already exists for the same container.
    async fn insert(&self, record: NewSessionRecord) -> Result<SessionRecord>;

    /// Counts and inserts as one atomic step per user.
    ///
    /// # Returns
    ///
    /// `None` when the user already owns `max_sessions` records or more.
    async fn insert_within_limit(
        &self,
        record: NewSessionRecord,
        max_sessions: u64,
    ) -> Result<Option<SessionRecord>>;

    /// The record for `container_id` if it belongs to `user_id`.
    async fn find_by_container(
        &self,
        user_id: Uuid,
        container_id: &str,
    ) -> Result<Option<SessionRecord>>;

    /// All records owned by the user, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<SessionRecord>>;

    /// Sets `last_activity` on the matching record. Returns whether one matched.
    async fn touch(&self, user_id: Uuid, container_id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Deletes the record for `container_id`. Returns whether one existed.
    async fn delete_by_container(&self, container_id: &str) -> Result<bool>;

    /// Container ids referenced by any record.
    async fn container_ids(&self) -> Result<Vec<String>>;
}

const INSERT_RECORD_SQL: &str = r#"
    INSERT INTO session_records (
        id, user_id, container_id, ip_address, city, country,
        browser_info, device_info, created_at, last_activity, expires_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    RETURNING id, user_id, container_id, ip_address, city, country,
        browser_info, device_info, created_at, last_activity, expires_at
"#;

const COUNT_FOR_USER_SQL: &str = "SELECT COUNT(*) FROM session_records WHERE user_id = $1";

/// Positional parameters for [`INSERT_RECORD_SQL`].
fn insert_params(record: &SessionRecord) -> [&(dyn ToSql + Sync); 11] {
    [
        &record.id,
        &record.user_id,
        &record.container_id,
        &record.ip_address,
        &record.city,
        &record.country,
        &record.browser_info,
        &record.device_info,
        &record.created_at,
        &record.last_activity,
        &record.expires_at,
    ]
}

fn map_insert_error(e: tokio_postgres::Error, container_id: &str) -> AppError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        return AppError::Conflict(format!(
            "Session record already exists for container {}",
            container_id
        ));
    }
    AppError::Database(e)
}

/// [`SessionRecordRepository`] over the `session_records` table.
#[derive(Clone)]
pub struct PgSessionRecordRepository {
    pool: Pool,
}

impl PgSessionRecordRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRecordRepository for PgSessionRecordRepository {
    async fn count_for_user(&self, user_id: Uuid) -> Result<u64> {
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(COUNT_FOR_USER_SQL).await?;
        let count: i64 = client.query_one(&statement, &[&user_id]).await?.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn insert(&self, record: NewSessionRecord) -> Result<SessionRecord> {
        let client = self.pool.get().await?;
        let record = record.into_record();
        let statement = client.prepare_cached(INSERT_RECORD_SQL).await?;
        let row = client
            .query_one(&statement, &insert_params(&record))
            .await
            .map_err(|e| map_insert_error(e, &record.container_id))?;
        SessionRecord::from_row(&row)
    }

    async fn insert_within_limit(
        &self,
        record: NewSessionRecord,
        max_sessions: u64,
    ) -> Result<Option<SessionRecord>> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;

        // Serializes admissions per user until commit/rollback.
        transaction
            .execute(
                "SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))",
                &[&record.user_id.to_string()],
            )
            .await?;

        let statement = transaction.prepare_cached(COUNT_FOR_USER_SQL).await?;
        let count: i64 = transaction
            .query_one(&statement, &[&record.user_id])
            .await?
            .try_get(0)?;
        if count.max(0) as u64 >= max_sessions {
            transaction.rollback().await?;
            return Ok(None);
        }

        let record = record.into_record();
        let statement = transaction.prepare_cached(INSERT_RECORD_SQL).await?;
        let row = transaction
            .query_one(&statement, &insert_params(&record))
            .await
            .map_err(|e| map_insert_error(e, &record.container_id))?;
        transaction.commit().await?;

        SessionRecord::from_row(&row).map(Some)
    }

    async fn find_by_container(
        &self,
        user_id: Uuid,
        container_id: &str,
    ) -> Result<Option<SessionRecord>> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {} FROM session_records WHERE user_id = $1 AND container_id = $2",
            SESSION_RECORD_COLUMNS
        );
        let statement = client.prepare_cached(&query).await?;
        let row = client.query_opt(&statement, &[&user_id, &container_id]).await?;
        row.map(|r| SessionRecord::from_row(&r)).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<SessionRecord>> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {} FROM session_records WHERE user_id = $1 ORDER BY created_at DESC",
            SESSION_RECORD_COLUMNS
        );
        let statement = client.prepare_cached(&query).await?;
        let rows = client.query(&statement, &[&user_id]).await?;
        rows.iter().map(SessionRecord::from_row).collect()
    }

    async fn touch(&self, user_id: Uuid, container_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                r#"
                UPDATE session_records
                SET last_activity = $3
                WHERE user_id = $1 AND container_id = $2
                "#,
            )
            .await?;
        let updated = client
            .execute(&statement, &[&user_id, &container_id, &at])
            .await?;
        Ok(updated > 0)
    }

    async fn delete_by_container(&self, container_id: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached("DELETE FROM session_records WHERE container_id = $1")
            .await?;
        let deleted = client.execute(&statement, &[&container_id]).await?;
        Ok(deleted > 0)
    }

    async fn container_ids(&self) -> Result<Vec<String>> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached("SELECT container_id FROM session_records")
            .await?;
        let rows = client.query(&statement, &[]).await?;
        rows.iter()
            .map(|row| row.try_get("container_id").map_err(AppError::from))
            .collect()
    }
}
