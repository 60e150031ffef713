use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::Result;

/// Metadata about one login session.
///
/// Each record belongs to exactly one session container; deleting the
/// container is what ends the record's life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// The record's own identifier.
    pub id: Uuid,
    /// The user who owns the session.
    pub user_id: Uuid,
    /// Identifier of the session container this record describes.
    pub container_id: String,
    /// The client address the session was opened from.
    pub ip_address: IpAddr,
    /// City resolved from the address, if known.
    pub city: Option<String>,
    /// Country resolved from the address, if known.
    pub country: Option<String>,
    /// `"{browser family} {browser version}"`.
    pub browser_info: String,
    /// `"{device family} {os family} {os version}"`.
    pub device_info: String,
    /// When the session was admitted. Never changes.
    pub created_at: DateTime<Utc>,
    /// The last request seen for this session.
    pub last_activity: Option<DateTime<Utc>>,
    /// When the session stops being valid. `None` means it never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Builds a record from a `session_records` row.
    ///
    /// # Arguments
    ///
    /// * `row` - A row selected with [`SESSION_RECORD_COLUMNS`].
    ///
    /// # Returns
    ///
    /// A `Result` containing the `SessionRecord`.
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            container_id: row.try_get("container_id")?,
            ip_address: row.try_get("ip_address")?,
            city: row.try_get("city")?,
            country: row.try_get("country")?,
            browser_info: row.try_get("browser_info")?,
            device_info: row.try_get("device_info")?,
            created_at: row.try_get("created_at")?,
            last_activity: row.try_get("last_activity")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    /// Whether the record has an expiry date that has passed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Column list matching [`SessionRecord::from_row`].
pub const SESSION_RECORD_COLUMNS: &str = "id, user_id, container_id, ip_address, city, country, \
     browser_info, device_info, created_at, last_activity, expires_at";

/// Where a session came from, as resolved by the metadata enricher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoDescriptor {
    pub ip_address: IpAddr,
    pub city: Option<String>,
    pub country: Option<String>,
}

/// What a session runs on, as resolved by the metadata enricher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub browser_info: String,
    pub device_info: String,
}

/// Everything needed to insert a record; the id is assigned on insert.
#[derive(Debug, Clone)]
pub struct NewSessionRecord {
    pub user_id: Uuid,
    pub container_id: String,
    pub geo: GeoDescriptor,
    pub device: DeviceDescriptor,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewSessionRecord {
    /// Materializes the record under a freshly generated id.
    pub fn into_record(self) -> SessionRecord {
        SessionRecord {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            container_id: self.container_id,
            ip_address: self.geo.ip_address,
            city: self.geo.city,
            country: self.geo.country,
            browser_info: self.device.browser_info,
            device_info: self.device.device_info,
            created_at: self.created_at,
            last_activity: self.last_activity,
            expires_at: self.expires_at,
        }
    }
}
