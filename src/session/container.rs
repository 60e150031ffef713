use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sonic_rs::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Result;

/// The per-client session blob handed to every request.
///
/// A container is a string-keyed map of JSON values plus an expiry date. It
/// only gets an identifier once a [`SessionStore`](super::store::SessionStore)
/// saves it. `flush` and `cycle_id` drop the current identifier; the ids they
/// discard are collected so the store can delete them when the request ends.
#[derive(Debug, Clone)]
pub struct SessionContainer {
    id: Option<String>,
    data: HashMap<String, Value>,
    expire_date: DateTime<Utc>,
    modified: bool,
    discarded: Vec<String>,
}

/// Serialized form of a container, as kept by the stores.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredContainer {
    pub data: HashMap<String, Value>,
    pub expire_date: DateTime<Utc>,
}

impl SessionContainer {
    /// Creates a fresh, unsaved container.
    pub fn new(expire_date: DateTime<Utc>) -> Self {
        Self {
            id: None,
            data: HashMap::new(),
            expire_date,
            modified: false,
            discarded: Vec::new(),
        }
    }

    /// Rebuilds a container loaded from a store under `id`.
    pub fn from_stored(id: String, stored: StoredContainer) -> Self {
        Self {
            id: Some(id),
            data: stored.data,
            expire_date: stored.expire_date,
            modified: false,
            discarded: Vec::new(),
        }
    }

    /// Snapshot suitable for persisting.
    pub fn to_stored(&self) -> StoredContainer {
        StoredContainer {
            data: self.data.clone(),
            expire_date: self.expire_date,
        }
    }

    /// The session identifier, `None` until the container is saved.
    pub fn identifier(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub(crate) fn assign_identifier(&mut self, id: String) {
        self.id = Some(id);
    }

    pub fn expire_date(&self) -> DateTime<Utc> {
        self.expire_date
    }

    pub fn set_expire_date(&mut self, expire_date: DateTime<Utc>) {
        self.expire_date = expire_date;
        self.modified = true;
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
        self.modified = true;
    }

    /// Removes `key`, returning its previous value.
    pub fn pop(&mut self, key: &str) -> Option<Value> {
        let previous = self.data.remove(key);
        if previous.is_some() {
            self.modified = true;
        }
        previous
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    /// Stores any serializable value under `key`.
    pub fn set_serialized<T: Serialize + ?Sized>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        let text = sonic_rs::to_string(value)?;
        let value: Value = sonic_rs::from_str(&text)?;
        self.set(key, value);
        Ok(())
    }

    /// Reads `key` back as `T`; `None` when missing or of the wrong shape.
    pub fn get_deserialized<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.data.get(key)?;
        let text = sonic_rs::to_string(raw).ok()?;
        sonic_rs::from_str(&text).ok()
    }

    /// Discards all data and the identifier. A new id is issued on next save.
    pub fn flush(&mut self) {
        self.data.clear();
        if let Some(id) = self.id.take() {
            self.discarded.push(id);
        }
        self.modified = true;
    }

    /// Keeps the data but drops the identifier, so the next save issues a new one.
    pub fn cycle_id(&mut self) {
        if let Some(id) = self.id.take() {
            self.discarded.push(id);
        }
        self.modified = true;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub(crate) fn mark_saved(&mut self) {
        self.modified = false;
    }

    /// Forgets the identifier and data without scheduling any deletion.
    ///
    /// Used when the stored container vanished while the request held it.
    pub(crate) fn detach(&mut self) {
        self.id = None;
        self.data.clear();
        self.discarded.clear();
        self.modified = false;
    }

    /// Identifiers abandoned by `flush`/`cycle_id` since the last call.
    pub(crate) fn take_discarded(&mut self) -> Vec<String> {
        std::mem::take(&mut self.discarded)
    }
}

/// Shared handle to the request's container, stored in request extensions.
#[derive(Debug, Clone)]
pub struct SessionHandle(Arc<Mutex<SessionContainer>>);

impl SessionHandle {
    pub fn new(container: SessionContainer) -> Self {
        Self(Arc::new(Mutex::new(container)))
    }

    pub async fn lock(&self) -> MutexGuard<'_, SessionContainer> {
        self.0.lock().await
    }
}
