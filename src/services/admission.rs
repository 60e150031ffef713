use std::sync::Arc;
use uuid::Uuid;

use crate::{
    clock::Clock,
    config::{AdmissionMode, PolicyConfig},
    crypto::cipher::CryptoBox,
    error::{AppError, Result},
    models::session_record::NewSessionRecord,
    repositories::session_record::SessionRecordRepository,
    services::enricher::{MetadataEnricher, RequestSignals},
    session::{
        container::SessionContainer,
        expiring::ExpiringStore,
        identity::LogoutHandler,
        store::SessionStore,
    },
};

/// Value stored under the marker key. Only its presence matters.
const MARKER_VALUE: &str = "Rc";

/// What the admission policy decided for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// A new record was created and the marker set.
    Admitted,
    /// The user already owns the maximum number of records; nothing changed.
    Denied,
    /// The marker is live; nothing changed.
    Active,
    /// The marker is live and its lifespan was restarted.
    Refreshed,
    /// A record for this container already existed; the marker was set.
    AlreadyRecorded,
    /// The marker had elapsed; the user was logged out.
    Expired,
}

impl AdmissionOutcome {
    /// Whether the request must stop here.
    pub fn terminates_request(self) -> bool {
        self == AdmissionOutcome::Expired
    }
}

/// Decides, per authenticated request, whether the session is registered,
/// refused, left alone or expired.
#[derive(Clone)]
pub struct AdmissionPolicy {
    settings: PolicyConfig,
    sessions: Arc<dyn SessionStore>,
    records: Arc<dyn SessionRecordRepository>,
    enricher: MetadataEnricher,
    cipher: Arc<CryptoBox>,
    clock: Arc<dyn Clock>,
    logout: Arc<dyn LogoutHandler>,
}

impl AdmissionPolicy {
    pub fn new(
        settings: PolicyConfig,
        sessions: Arc<dyn SessionStore>,
        records: Arc<dyn SessionRecordRepository>,
        enricher: MetadataEnricher,
        cipher: Arc<CryptoBox>,
        clock: Arc<dyn Clock>,
        logout: Arc<dyn LogoutHandler>,
    ) -> Self {
        Self {
            settings,
            sessions,
            records,
            enricher,
            cipher,
            clock,
            logout,
        }
    }

    pub fn settings(&self) -> &PolicyConfig {
        &self.settings
    }

    fn expiring<'a>(&'a self, container: &'a mut SessionContainer) -> ExpiringStore<'a> {
        ExpiringStore::new(container, &self.cipher)
            .with_clock(self.clock.as_ref())
            .with_logout(self.logout.as_ref())
    }

    /// Runs the policy for `user_id` against the request's container.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The authenticated user.
    /// * `container` - The request's session container.
    /// * `signals` - Client address and user agent, used when a record is created.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AdmissionOutcome`.
    pub async fn evaluate(
        &self,
        user_id: Uuid,
        container: &mut SessionContainer,
        signals: &RequestSignals,
    ) -> Result<AdmissionOutcome> {
        if container.identifier().is_none() {
            self.sessions.save(container).await?;
        }

        let marker = self.settings.marker_key.as_str();
        let (present, expired) = {
            let store = self.expiring(container);
            (store.exists(marker), store.is_expired(marker))
        };

        if !present {
            return self.admit(user_id, container, signals).await;
        }

        if expired {
            return self.expire(user_id, container).await;
        }

        if self.settings.sliding_expiry {
            self.expiring(container).refresh(marker, self.settings.expiry())?;
            return Ok(AdmissionOutcome::Refreshed);
        }

        Ok(AdmissionOutcome::Active)
    }

    async fn admit(
        &self,
        user_id: Uuid,
        container: &mut SessionContainer,
        signals: &RequestSignals,
    ) -> Result<AdmissionOutcome> {
        let container_id = container
            .identifier()
            .map(str::to_string)
            .ok_or_else(|| AppError::Internal("Session container has no identifier".to_string()))?;
        let max_sessions = self.settings.max_sessions;

        if self.settings.mode == AdmissionMode::Relaxed {
            let count = self.records.count_for_user(user_id).await?;
            if count >= max_sessions {
                return Ok(self.deny(user_id));
            }
        }

        let (geo, device) = self.enricher.enrich(signals).await;
        let now = self.clock.now();
        let record = NewSessionRecord {
            user_id,
            container_id,
            geo,
            device,
            created_at: now,
            last_activity: Some(now),
            expires_at: Some(now + self.settings.expiry()),
        };

        let inserted = match self.settings.mode {
            AdmissionMode::Relaxed => self.records.insert(record).await.map(Some),
            AdmissionMode::Serialized => self.records.insert_within_limit(record, max_sessions).await,
        };

        let outcome = match inserted {
            Ok(Some(record)) => {
                tracing::info!(
                    "✅ Session admitted for user {} from {} ({})",
                    user_id,
                    record.ip_address,
                    record.browser_info.trim_end()
                );
                AdmissionOutcome::Admitted
            }
            Ok(None) => return Ok(self.deny(user_id)),
            Err(AppError::Conflict(msg)) => {
                tracing::info!("🔁 {}", msg);
                AdmissionOutcome::AlreadyRecorded
            }
            Err(e) => return Err(e),
        };

        let marker = self.settings.marker_key.as_str();
        self.expiring(container)
            .set(marker, MARKER_VALUE, self.settings.expiry(), true)?;

        Ok(outcome)
    }

    fn deny(&self, user_id: Uuid) -> AdmissionOutcome {
        tracing::info!(
            "🚫 User {} has reached the maximum number of allowed sessions.",
            user_id
        );
        AdmissionOutcome::Denied
    }

    async fn expire(&self, user_id: Uuid, container: &mut SessionContainer) -> Result<AdmissionOutcome> {
        if self.settings.purge_record_on_expiry {
            if let Some(id) = container.identifier().map(str::to_string) {
                self.records.delete_by_container(&id).await?;
            }
        }

        let marker = self.settings.marker_key.as_str();
        self.expiring(container).handle_expiration(marker, true)?;
        tracing::info!("⌛ Session expired for user {}", user_id);

        Ok(AdmissionOutcome::Expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::session_record::{DeviceDescriptor, GeoDescriptor};
    use crate::repositories::memory::MemorySessionRecordRepository;
    use crate::services::enricher::NullGeoLocator;
    use crate::services::user_agent::HeuristicUserAgentParser;
    use crate::session::expiring::EXPIRED_NOTICE;
    use crate::session::identity::{self, SessionLogout};
    use crate::session::notice::{self, Notice};
    use crate::session::store::MemorySessionStore;
    use chrono::Duration;
    use std::net::{IpAddr, Ipv4Addr};

    struct Harness {
        policy: AdmissionPolicy,
        records: MemorySessionRecordRepository,
        sessions: MemorySessionStore,
        clock: ManualClock,
    }

    fn harness(settings: PolicyConfig) -> Harness {
        let records = MemorySessionRecordRepository::new();
        let sessions = MemorySessionStore::new();
        let clock = ManualClock::default();
        let enricher = MetadataEnricher::new(
            Arc::new(NullGeoLocator),
            Arc::new(HeuristicUserAgentParser),
        );
        let policy = AdmissionPolicy::new(
            settings,
            Arc::new(sessions.clone()),
            Arc::new(records.clone()),
            enricher,
            Arc::new(CryptoBox::generate()),
            Arc::new(clock.clone()),
            Arc::new(SessionLogout),
        );

        Harness { policy, records, sessions, clock }
    }

    fn signals() -> RequestSignals {
        RequestSignals {
            client_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0"
                .to_string(),
        }
    }

    fn logged_in(user: Uuid) -> SessionContainer {
        let mut container = SessionContainer::new(chrono::Utc::now() + Duration::days(7));
        identity::login(&mut container, user).unwrap();
        container
    }

    async fn seed_records(records: &MemorySessionRecordRepository, user: Uuid, n: usize) {
        for i in 0..n {
            records
                .insert(NewSessionRecord {
                    user_id: user,
                    container_id: format!("seeded-{}", i),
                    geo: GeoDescriptor {
                        ip_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                        city: None,
                        country: None,
                    },
                    device: DeviceDescriptor {
                        browser_info: "Other ".to_string(),
                        device_info: "Other Other ".to_string(),
                    },
                    created_at: chrono::Utc::now(),
                    last_activity: None,
                    expires_at: None,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_first_request_admits_and_records_metadata() {
        let h = harness(PolicyConfig::default());
        let user = Uuid::new_v4();
        let mut container = logged_in(user);

        let outcome = h.policy.evaluate(user, &mut container, &signals()).await.unwrap();

        assert_eq!(outcome, AdmissionOutcome::Admitted);
        let id = container.identifier().unwrap().to_string();
        assert!(h.sessions.exists(&id).await.unwrap());

        let record = h.records.find_by_container(user, &id).await.unwrap().unwrap();
        assert_eq!(record.city.as_deref(), Some("Local"));
        assert_eq!(record.country.as_deref(), Some("Local Network"));
        assert_eq!(record.browser_info, "Firefox 121.0");
        assert_eq!(record.device_info, "Other Linux ");
        assert_eq!(record.last_activity, Some(h.clock.now()));
        assert_eq!(record.expires_at, Some(h.clock.now() + Duration::minutes(5)));
        assert!(container.contains_key("default_session"));
    }

    #[tokio::test]
    async fn test_live_marker_is_left_alone() {
        let h = harness(PolicyConfig::default());
        let user = Uuid::new_v4();
        let mut container = logged_in(user);

        h.policy.evaluate(user, &mut container, &signals()).await.unwrap();
        h.clock.advance(Duration::minutes(4));
        let outcome = h.policy.evaluate(user, &mut container, &signals()).await.unwrap();

        assert_eq!(outcome, AdmissionOutcome::Active);
        assert_eq!(h.records.len().await, 1);
    }

    #[tokio::test]
    async fn test_eleventh_session_is_denied() {
        let h = harness(PolicyConfig::default());
        let user = Uuid::new_v4();
        seed_records(&h.records, user, 10).await;

        let mut container = logged_in(user);
        let outcome = h.policy.evaluate(user, &mut container, &signals()).await.unwrap();

        assert_eq!(outcome, AdmissionOutcome::Denied);
        assert_eq!(h.records.count_for_user(user).await.unwrap(), 10);
        assert!(!container.contains_key("default_session"));
        assert_eq!(identity::current_user(&container), Some(user));
    }

    #[tokio::test]
    async fn test_limit_counts_only_the_users_own_records() {
        let h = harness(PolicyConfig { max_sessions: 1, ..PolicyConfig::default() });
        seed_records(&h.records, Uuid::new_v4(), 3).await;
        let user = Uuid::new_v4();

        let mut container = logged_in(user);
        let outcome = h.policy.evaluate(user, &mut container, &signals()).await.unwrap();

        assert_eq!(outcome, AdmissionOutcome::Admitted);
    }

    #[tokio::test]
    async fn test_elapsed_marker_logs_out_and_keeps_record() {
        let h = harness(PolicyConfig::default());
        let user = Uuid::new_v4();
        let mut container = logged_in(user);
        h.policy.evaluate(user, &mut container, &signals()).await.unwrap();
        let id = container.identifier().unwrap().to_string();

        h.clock.advance(Duration::minutes(5));
        let outcome = h.policy.evaluate(user, &mut container, &signals()).await.unwrap();

        assert_eq!(outcome, AdmissionOutcome::Expired);
        assert!(outcome.terminates_request());
        assert!(!container.contains_key("default_session"));
        assert_eq!(identity::current_user(&container), None);
        assert_eq!(notice::peek(&container), vec![Notice::info(EXPIRED_NOTICE)]);
        assert!(h.records.find_by_container(user, &id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_on_expiry_deletes_record() {
        let h = harness(PolicyConfig { purge_record_on_expiry: true, ..PolicyConfig::default() });
        let user = Uuid::new_v4();
        let mut container = logged_in(user);
        h.policy.evaluate(user, &mut container, &signals()).await.unwrap();

        h.clock.advance(Duration::minutes(6));
        let outcome = h.policy.evaluate(user, &mut container, &signals()).await.unwrap();

        assert_eq!(outcome, AdmissionOutcome::Expired);
        assert_eq!(h.records.len().await, 0);
    }

    #[tokio::test]
    async fn test_sliding_expiry_keeps_active_session_alive() {
        let h = harness(PolicyConfig { sliding_expiry: true, ..PolicyConfig::default() });
        let user = Uuid::new_v4();
        let mut container = logged_in(user);
        h.policy.evaluate(user, &mut container, &signals()).await.unwrap();

        for _ in 0..3 {
            h.clock.advance(Duration::minutes(4));
            let outcome = h.policy.evaluate(user, &mut container, &signals()).await.unwrap();
            assert_eq!(outcome, AdmissionOutcome::Refreshed);
        }

        h.clock.advance(Duration::minutes(5));
        let outcome = h.policy.evaluate(user, &mut container, &signals()).await.unwrap();
        assert_eq!(outcome, AdmissionOutcome::Expired);
    }

    #[tokio::test]
    async fn test_existing_record_for_container_counts_as_recorded() {
        let h = harness(PolicyConfig::default());
        let user = Uuid::new_v4();
        let mut container = logged_in(user);
        h.policy.evaluate(user, &mut container, &signals()).await.unwrap();

        container.pop("default_session");
        let outcome = h.policy.evaluate(user, &mut container, &signals()).await.unwrap();

        assert_eq!(outcome, AdmissionOutcome::AlreadyRecorded);
        assert!(container.contains_key("default_session"));
        assert_eq!(h.records.len().await, 1);
    }

    #[tokio::test]
    async fn test_serialized_mode_never_overshoots() {
        let h = harness(PolicyConfig {
            max_sessions: 3,
            mode: AdmissionMode::Serialized,
            ..PolicyConfig::default()
        });
        let user = Uuid::new_v4();
        let policy = Arc::new(h.policy.clone());

        let tasks: Vec<_> = (0..12)
            .map(|_| {
                let policy = policy.clone();
                tokio::spawn(async move {
                    let mut container = logged_in(user);
                    policy.evaluate(user, &mut container, &signals()).await
                })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() == AdmissionOutcome::Admitted {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3);
        assert_eq!(h.records.count_for_user(user).await.unwrap(), 3);
    }
}
