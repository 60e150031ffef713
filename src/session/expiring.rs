//! Encrypted key/value entries with independent lifespans, kept inside a
//! session container.
//!
//! Expiry is lazy: nothing sweeps entries in the background. An entry whose
//! lifespan has elapsed is removed the first time `get` observes it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sonic_rs::Value;

use crate::clock::{Clock, SystemClock};
use crate::crypto::cipher::CryptoBox;
use crate::error::{AppError, Result};
use crate::session::container::SessionContainer;
use crate::session::identity::{LogoutHandler, SessionLogout};
use crate::session::notice::{self, Notice};

/// Notice shown after an expiry-driven logout.
pub const EXPIRED_NOTICE: &str = "Your session has expired. Please log in again.";

/// A value with a creation time and a lifespan.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiringEntry {
    /// Stored text: plaintext, or a `CryptoBox` token when encrypted.
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub lifespan: Duration,
}

/// On-container layout: seconds as floats.
#[derive(Serialize, Deserialize)]
struct EntryWire {
    value: String,
    created_at: f64,
    lifespan: f64,
}

impl ExpiringEntry {
    /// Whether the entry is still live at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at < self.lifespan
    }

    fn to_wire(&self) -> EntryWire {
        EntryWire {
            value: self.value.clone(),
            created_at: self.created_at.timestamp_micros() as f64 / 1_000_000.0,
            lifespan: self.lifespan.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0,
        }
    }

    fn from_wire(wire: EntryWire) -> Option<Self> {
        if !wire.created_at.is_finite() || !wire.lifespan.is_finite() {
            return None;
        }
        let created_at = DateTime::from_timestamp_micros((wire.created_at * 1_000_000.0).round() as i64)?;
        let lifespan = Duration::microseconds((wire.lifespan * 1_000_000.0).round() as i64);

        Some(Self {
            value: wire.value,
            created_at,
            lifespan,
        })
    }

    /// Reads the entry under `key`; `None` when missing or malformed.
    fn load(container: &SessionContainer, key: &str) -> Option<Self> {
        container
            .get_deserialized::<EntryWire>(key)
            .and_then(Self::from_wire)
    }

    fn store(&self, container: &mut SessionContainer, key: &str) -> Result<()> {
        container.set_serialized(key, &self.to_wire())
    }
}

/// Expiring, optionally encrypted entries over one request's container.
pub struct ExpiringStore<'a> {
    container: &'a mut SessionContainer,
    cipher: &'a CryptoBox,
    clock: &'a dyn Clock,
    logout: &'a dyn LogoutHandler,
}

impl<'a> ExpiringStore<'a> {
    /// Binds a store to `container`, sealing values with `cipher`.
    pub fn new(container: &'a mut SessionContainer, cipher: &'a CryptoBox) -> Self {
        Self {
            container,
            cipher,
            clock: &SystemClock,
            logout: &SessionLogout,
        }
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_logout(mut self, logout: &'a dyn LogoutHandler) -> Self {
        self.logout = logout;
        self
    }

    /// Stores `value` under `key` for `lifespan`, encrypting it when asked.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `key` is empty or `lifespan` is not positive.
    pub fn set(&mut self, key: &str, value: &str, lifespan: Duration, encrypt: bool) -> Result<()> {
        if key.is_empty() {
            return Err(AppError::InvalidArgument(
                "Key must be a non-empty string".to_string(),
            ));
        }
        if lifespan <= Duration::zero() {
            return Err(AppError::InvalidArgument(
                "Lifespan must be positive".to_string(),
            ));
        }

        let value = if encrypt {
            self.cipher.encrypt(value.as_bytes())?
        } else {
            value.to_string()
        };

        let entry = ExpiringEntry {
            value,
            created_at: self.clock.now(),
            lifespan,
        };

        entry.store(self.container, key)
    }

    /// Returns the live value under `key`.
    ///
    /// An elapsed entry is deleted and reported as absent. A value that fails
    /// to decrypt is logged and also reported as absent.
    pub fn get(&mut self, key: &str, decrypt: bool) -> Option<String> {
        let entry = ExpiringEntry::load(self.container, key)?;

        if !entry.is_live(self.clock.now()) {
            tracing::debug!("⌛ Session key {} expired, removing", key);
            self.container.pop(key);
            return None;
        }

        if !decrypt {
            return Some(entry.value);
        }

        match self.cipher.decrypt(&entry.value) {
            Ok(plaintext) => match String::from_utf8(plaintext) {
                Ok(text) => Some(text),
                Err(_) => {
                    tracing::error!("❌ Session key {} decrypted to non-UTF-8 data", key);
                    None
                }
            },
            Err(_) => {
                tracing::error!(
                    "❌ Invalid token for session key {}. Possible data tampering.",
                    key
                );
                None
            }
        }
    }

    /// Removes `key`, returning the raw stored entry if there was one.
    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.container.pop(key)
    }

    /// Whether `key` is present in the container, live or not.
    ///
    /// Presence is deliberately raw: an elapsed entry still "exists" until
    /// `get` or `delete` removes it, which is what lets callers tell
    /// "never set" apart from "set and now expired" via [`Self::is_expired`].
    pub fn exists(&self, key: &str) -> bool {
        self.container.contains_key(key)
    }

    /// True when the entry is missing, malformed, or past its lifespan.
    pub fn is_expired(&self, key: &str) -> bool {
        match ExpiringEntry::load(self.container, key) {
            Some(entry) => !entry.is_live(self.clock.now()),
            None => true,
        }
    }

    /// Restarts the clock of an existing entry with a new lifespan.
    ///
    /// Works on elapsed entries that have not been removed yet. Returns
    /// `false` (and changes nothing) when the key is missing or malformed.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `lifespan` is not positive.
    pub fn refresh(&mut self, key: &str, lifespan: Duration) -> Result<bool> {
        if lifespan <= Duration::zero() {
            return Err(AppError::InvalidArgument(
                "Lifespan must be positive".to_string(),
            ));
        }

        let Some(mut entry) = ExpiringEntry::load(self.container, key) else {
            return Ok(false);
        };

        entry.created_at = self.clock.now();
        entry.lifespan = lifespan;
        entry.store(self.container, key)?;
        Ok(true)
    }

    /// Drops `key` and, when `force_logout` is set, logs the user out and
    /// leaves them a notice explaining why.
    pub fn handle_expiration(&mut self, key: &str, force_logout: bool) -> Result<()> {
        self.delete(key);

        if force_logout {
            self.logout.logout(self.container);
            notice::push(self.container, Notice::info(EXPIRED_NOTICE))?;
            tracing::info!("⌛ Session {} expired, user logged out", key);
        }

        Ok(())
    }

    /// Discards the whole container.
    pub fn flush(&mut self) {
        self.container.flush();
    }

    /// Rotates the container id, keeping its contents.
    pub fn cycle_id(&mut self) {
        self.container.cycle_id();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::identity::{self, AUTH_USER_KEY};
    use uuid::Uuid;

    fn container() -> SessionContainer {
        SessionContainer::new(Utc::now() + Duration::days(1))
    }

    #[test]
    fn test_set_then_get_with_encryption() {
        let cipher = CryptoBox::generate();
        let clock = ManualClock::default();
        let mut container = container();
        let mut store = ExpiringStore::new(&mut container, &cipher).with_clock(&clock);

        store.set("test_key", "test_value", Duration::minutes(5), true).unwrap();

        assert_eq!(store.get("test_key", true).as_deref(), Some("test_value"));
        let raw = store.get("test_key", false).unwrap();
        assert_ne!(raw, "test_value");
    }

    #[test]
    fn test_set_then_get_without_encryption() {
        let cipher = CryptoBox::generate();
        let clock = ManualClock::default();
        let mut container = container();
        let mut store = ExpiringStore::new(&mut container, &cipher).with_clock(&clock);

        store.set("plain", "visible", Duration::minutes(5), false).unwrap();

        assert_eq!(store.get("plain", false).as_deref(), Some("visible"));
    }

    #[test]
    fn test_set_rejects_bad_arguments() {
        let cipher = CryptoBox::generate();
        let mut container = container();
        let mut store = ExpiringStore::new(&mut container, &cipher);

        assert!(matches!(
            store.set("", "v", Duration::minutes(1), true),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.set("k", "v", Duration::zero(), true),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.set("k", "v", Duration::seconds(-5), true),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(!store.exists("k"));
    }

    #[test]
    fn test_elapsed_entry_is_removed_on_read() {
        let cipher = CryptoBox::generate();
        let clock = ManualClock::default();
        let mut container = container();
        let mut store = ExpiringStore::new(&mut container, &cipher).with_clock(&clock);

        store.set("k", "v", Duration::seconds(2), true).unwrap();
        assert_eq!(store.get("k", true).as_deref(), Some("v"));

        clock.advance(Duration::seconds(3));

        assert!(store.exists("k"));
        assert!(store.is_expired("k"));
        assert_eq!(store.get("k", true), None);
        assert!(!store.exists("k"));
    }

    #[test]
    fn test_entry_expires_exactly_at_lifespan() {
        let cipher = CryptoBox::generate();
        let clock = ManualClock::default();
        let mut container = container();
        let mut store = ExpiringStore::new(&mut container, &cipher).with_clock(&clock);

        store.set("k", "v", Duration::seconds(10), false).unwrap();
        clock.advance(Duration::milliseconds(9_999));
        assert!(!store.is_expired("k"));

        clock.advance(Duration::milliseconds(1));
        assert!(store.is_expired("k"));
        assert_eq!(store.get("k", false), None);
    }

    #[test]
    fn test_expiry_with_wall_clock() {
        let cipher = CryptoBox::generate();
        let mut container = container();
        let mut store = ExpiringStore::new(&mut container, &cipher);

        store.set("k", "v", Duration::milliseconds(200), true).unwrap();
        assert_eq!(store.get("k", true).as_deref(), Some("v"));

        std::thread::sleep(std::time::Duration::from_millis(300));

        assert_eq!(store.get("k", true), None);
        assert!(!store.exists("k"));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let cipher = CryptoBox::generate();
        let mut container = container();
        let mut store = ExpiringStore::new(&mut container, &cipher);

        assert!(store.delete("missing").is_none());

        store.set("k", "v", Duration::minutes(1), true).unwrap();
        assert!(store.delete("k").is_some());
        assert!(store.delete("k").is_none());
        assert_eq!(store.get("k", true), None);
    }

    #[test]
    fn test_missing_key_is_expired() {
        let cipher = CryptoBox::generate();
        let mut container = container();
        let store = ExpiringStore::new(&mut container, &cipher);

        assert!(store.is_expired("nothing"));
        assert!(!store.exists("nothing"));
    }

    #[test]
    fn test_refresh_missing_key_does_nothing() {
        let cipher = CryptoBox::generate();
        let mut container = container();
        let mut store = ExpiringStore::new(&mut container, &cipher);

        assert!(!store.refresh("ghost", Duration::minutes(1)).unwrap());
        assert!(!store.exists("ghost"));
    }

    #[test]
    fn test_refresh_restarts_elapsed_but_unread_entry() {
        let cipher = CryptoBox::generate();
        let clock = ManualClock::default();
        let mut container = container();
        let mut store = ExpiringStore::new(&mut container, &cipher).with_clock(&clock);

        store.set("k", "v", Duration::seconds(5), true).unwrap();
        clock.advance(Duration::seconds(6));
        assert!(store.is_expired("k"));

        assert!(store.refresh("k", Duration::seconds(30)).unwrap());
        assert!(!store.is_expired("k"));

        clock.advance(Duration::seconds(29));
        assert_eq!(store.get("k", true).as_deref(), Some("v"));
    }

    #[test]
    fn test_refresh_rejects_non_positive_lifespan() {
        let cipher = CryptoBox::generate();
        let mut container = container();
        let mut store = ExpiringStore::new(&mut container, &cipher);
        store.set("k", "v", Duration::minutes(1), true).unwrap();

        assert!(matches!(
            store.refresh("k", Duration::zero()),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_reads_as_absent() {
        let cipher = CryptoBox::generate();
        let clock = ManualClock::default();
        let mut container = container();
        ExpiringStore::new(&mut container, &cipher)
            .with_clock(&clock)
            .set("secret", "hunter2", Duration::minutes(5), true)
            .unwrap();

        let mut wire = container.get_deserialized::<EntryWire>("secret").unwrap();
        wire.value.replace_range(0..4, "AAAA");
        container.set_serialized("secret", &wire).unwrap();

        let mut store = ExpiringStore::new(&mut container, &cipher).with_clock(&clock);
        assert_eq!(store.get("secret", true), None);
        assert!(store.exists("secret"));
    }

    #[test]
    fn test_foreign_key_ciphertext_reads_as_absent() {
        let ours = CryptoBox::generate();
        let theirs = CryptoBox::generate();
        let mut container = container();
        ExpiringStore::new(&mut container, &theirs)
            .set("k", "v", Duration::minutes(5), true)
            .unwrap();

        let mut store = ExpiringStore::new(&mut container, &ours);
        assert_eq!(store.get("k", true), None);
    }

    #[test]
    fn test_malformed_entry_reads_as_absent() {
        let cipher = CryptoBox::generate();
        let mut container = container();
        container.set_serialized("legacy", "just a string").unwrap();
        container
            .set_serialized("partial", &std::collections::HashMap::from([("value", "x")]))
            .unwrap();

        let mut store = ExpiringStore::new(&mut container, &cipher);

        assert_eq!(store.get("legacy", false), None);
        assert_eq!(store.get("partial", false), None);
        assert!(store.is_expired("partial"));
        assert!(!store.refresh("partial", Duration::minutes(1)).unwrap());
        assert!(store.exists("legacy"));
    }

    #[test]
    fn test_handle_expiration_logs_out_and_leaves_notice() {
        let cipher = CryptoBox::generate();
        let mut container = container();
        identity::login(&mut container, Uuid::new_v4()).unwrap();

        let mut store = ExpiringStore::new(&mut container, &cipher);
        store.set("marker", "1", Duration::minutes(1), true).unwrap();
        store.handle_expiration("marker", true).unwrap();

        assert!(!container.contains_key("marker"));
        assert!(!container.contains_key(AUTH_USER_KEY));
        assert_eq!(notice::peek(&container), vec![Notice::info(EXPIRED_NOTICE)]);
    }

    #[test]
    fn test_handle_expiration_without_logout_keeps_identity() {
        let cipher = CryptoBox::generate();
        let mut container = container();
        let user = Uuid::new_v4();
        identity::login(&mut container, user).unwrap();

        let mut store = ExpiringStore::new(&mut container, &cipher);
        store.set("marker", "1", Duration::minutes(1), false).unwrap();
        store.handle_expiration("marker", false).unwrap();

        assert!(!container.contains_key("marker"));
        assert_eq!(identity::current_user(&container), Some(user));
        assert!(notice::peek(&container).is_empty());
    }

    #[test]
    fn test_wire_layout_uses_float_seconds() {
        let created_at = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
        let entry = ExpiringEntry {
            value: "v".to_string(),
            created_at,
            lifespan: Duration::minutes(5),
        };

        let wire = entry.to_wire();
        assert_eq!(wire.created_at, 1_700_000_000.25);
        assert_eq!(wire.lifespan, 300.0);
        assert_eq!(ExpiringEntry::from_wire(wire), Some(entry));
    }
}
