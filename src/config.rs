use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use garde::Validate;
use zeroize::{Zeroize, Zeroizing};

/// How the admission policy guards the per-user session limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionMode {
    /// Count, then insert. Concurrent logins may overshoot the limit.
    #[default]
    Relaxed,
    /// Count and insert under one per-user lock. Never overshoots.
    Serialized,
}

impl FromStr for AdmissionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relaxed" => Ok(Self::Relaxed),
            "serialized" => Ok(Self::Serialized),
            other => anyhow::bail!("unknown admission mode '{}' (expected relaxed or serialized)", other),
        }
    }
}

/// One year.
const MAX_EXPIRY_MINUTES: i64 = 525_600;
/// Ten years.
const MAX_SESSION_DAYS: i64 = 3_650;

/// Settings of the session admission policy.
#[derive(Debug, Clone, Validate)]
pub struct PolicyConfig {
    /// Container key of the "session already registered" marker.
    #[garde(length(min = 1, max = 255))]
    pub marker_key: String,
    /// Lifespan of the marker, and offset of a new record's `expires_at`.
    #[garde(range(min = 1, max = MAX_EXPIRY_MINUTES))]
    pub expiry_minutes: i64,
    /// Records a user may own before new sessions are refused.
    #[garde(range(min = 1))]
    pub max_sessions: u64,
    #[garde(skip)]
    pub mode: AdmissionMode,
    /// Refresh a live marker on every request.
    #[garde(skip)]
    pub sliding_expiry: bool,
    /// Delete the session's record when its marker expires.
    #[garde(skip)]
    pub purge_record_on_expiry: bool,
}

impl PolicyConfig {
    pub fn expiry(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.expiry_minutes)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            marker_key: "default_session".to_string(),
            expiry_minutes: 5,
            max_sessions: 10,
            mode: AdmissionMode::Relaxed,
            sliding_expiry: false,
            purge_record_on_expiry: false,
        }
    }
}

/// The application's configuration.
#[derive(Clone, Validate)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    #[garde(skip)]
    pub database_url: String,
    /// Maximum connections in the PostgreSQL pool.
    #[garde(range(min = 1))]
    pub database_pool_size: usize,
    /// The URL of the Redis server.
    #[garde(skip)]
    pub redis_url: String,
    /// The address the HTTP server binds to.
    #[garde(skip)]
    pub bind_addr: SocketAddr,
    /// The lifetime of a session container in days.
    #[garde(range(min = 1, max = MAX_SESSION_DAYS))]
    pub session_duration_days: i64,
    /// The key that encrypts expiring session values.
    #[garde(skip)]
    pub session_secret_key: Zeroizing<Vec<u8>>,
    /// How often orphaned session records are swept.
    #[garde(custom(non_zero_interval))]
    pub orphan_sweep_interval: Duration,
    /// MaxMind City database used to place sessions. Unset disables geolocation.
    #[garde(skip)]
    pub geoip_database_path: Option<PathBuf>,
    /// The admission policy settings.
    #[garde(dive)]
    pub policy: PolicyConfig,
}

fn non_zero_interval(value: &Duration, _context: &()) -> garde::Result {
    if value.is_zero() {
        return Err(garde::Error::new("must be greater than zero"));
    }
    Ok(())
}

fn env_or<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e))
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let mut secret_hex = env::var("SESSION_SECRET_KEY")
            .context("SESSION_SECRET_KEY must be set (generate with: openssl rand -hex 32)")?;

        let secret_bytes = hex::decode(&secret_hex)
            .context("SESSION_SECRET_KEY must be valid hexadecimal");

        secret_hex.zeroize();
        let secret_bytes = Zeroizing::new(secret_bytes?);

        if secret_bytes.len() != 32 {
            anyhow::bail!("SESSION_SECRET_KEY must be exactly 32 bytes (64 hex characters)");
        }

        let policy = PolicyConfig {
            marker_key: env::var("SESSION_MARKER_KEY")
                .unwrap_or_else(|_| "default_session".to_string()),
            expiry_minutes: env_or("SESSION_EXPIRY_MINUTES", "5")?,
            max_sessions: env_or("MAX_USER_SESSIONS", "10")?,
            mode: env_or("ADMISSION_MODE", "relaxed")?,
            sliding_expiry: env_or("SLIDING_EXPIRY", "false")?,
            purge_record_on_expiry: env_or("PURGE_RECORD_ON_EXPIRY", "false")?,
        };

        let config = Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            database_pool_size: env_or("DATABASE_POOL_SIZE", "16")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            bind_addr: env_or("BIND_ADDR", "127.0.0.1:3000")?,
            session_duration_days: env_or("SESSION_DURATION_DAYS", "7")?,
            session_secret_key: secret_bytes,
            orphan_sweep_interval: Duration::from_secs(env_or("ORPHAN_SWEEP_SECS", "3600")?),
            geoip_database_path: env::var_os("GEOIP_DATABASE_PATH")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            policy,
        };

        config
            .validate()
            .map_err(|report| anyhow::anyhow!("Invalid configuration: {}", report))?;

        Ok(config)
    }
}
