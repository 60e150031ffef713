use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::{
    clock::{Clock, SystemClock},
    config::{Config, PolicyConfig},
    crypto::cipher::CryptoBox,
    error::Result,
    repositories::session_record::{PgSessionRecordRepository, SessionRecordRepository},
    services::{
        activity::ActivityTracker,
        admission::AdmissionPolicy,
        enricher::{GeoLocator, MetadataEnricher, NullGeoLocator},
        geoip::MaxMindGeoLocator,
        sessions::SessionManager,
        user_agent::HeuristicUserAgentParser,
    },
    session::{
        identity::SessionLogout,
        redis_store::RedisSessionStore,
        store::SessionStore,
    },
};

/// The collaborators an `AppState` is assembled from.
pub struct StateParts {
    pub policy: PolicyConfig,
    /// Lifetime of a session container and of its cookie.
    pub session_lifetime: chrono::Duration,
    pub sessions: Arc<dyn SessionStore>,
    pub records: Arc<dyn SessionRecordRepository>,
    pub cipher: CryptoBox,
    pub clock: Arc<dyn Clock>,
    pub geo: Arc<dyn GeoLocator>,
}

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// Lifetime of a session container and of its cookie.
    pub session_lifetime: chrono::Duration,
    /// The session container store.
    pub sessions: Arc<dyn SessionStore>,
    /// The time source.
    pub clock: Arc<dyn Clock>,
    /// The session admission policy.
    pub admission: AdmissionPolicy,
    /// The activity tracker.
    pub tracker: ActivityTracker,
    /// Session listing and revocation.
    pub manager: SessionManager,
}

impl AppState {
    /// Creates a new `AppState` backed by PostgreSQL and Redis.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = crate::db::create_pool(&config.database_url, config.database_pool_size)?;
        crate::db::ensure_schema(&db).await?;
        tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client).await?;
        tracing::info!("✅ Redis Connection Manager initialized (pooled)");

        let cipher = CryptoBox::from_slice(config.session_secret_key.as_slice())?;
        tracing::info!("✅ Session cipher initialized");

        let geo: Arc<dyn GeoLocator> = match &config.geoip_database_path {
            Some(path) => Arc::new(MaxMindGeoLocator::open(path)?),
            None => {
                tracing::warn!("⚠️ GEOIP_DATABASE_PATH not set, sessions will be stored without a location");
                Arc::new(NullGeoLocator)
            }
        };

        Ok(Self::assemble(StateParts {
            policy: config.policy.clone(),
            session_lifetime: chrono::Duration::days(config.session_duration_days),
            sessions: Arc::new(RedisSessionStore::new(redis)),
            records: Arc::new(PgSessionRecordRepository::new(db)),
            cipher,
            clock: Arc::new(SystemClock),
            geo,
        }))
    }

    /// Wires the services together from their collaborators.
    pub fn assemble(parts: StateParts) -> Self {
        let enricher = MetadataEnricher::new(parts.geo, Arc::new(HeuristicUserAgentParser));

        let admission = AdmissionPolicy::new(
            parts.policy,
            parts.sessions.clone(),
            parts.records.clone(),
            enricher,
            Arc::new(parts.cipher),
            parts.clock.clone(),
            Arc::new(SessionLogout),
        );

        let tracker = ActivityTracker::new(parts.records.clone(), parts.clock.clone());
        let manager = SessionManager::new(parts.sessions.clone(), parts.records);

        Self {
            session_lifetime: parts.session_lifetime,
            sessions: parts.sessions,
            clock: parts.clock,
            admission,
            tracker,
            manager,
        }
    }
}
