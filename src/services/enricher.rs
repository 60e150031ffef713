use async_trait::async_trait;
use axum::http::HeaderMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;

use crate::models::session_record::{DeviceDescriptor, GeoDescriptor};
use crate::services::user_agent::UserAgentParser;

/// City recorded for sessions opened from non-routable addresses.
pub const LOCAL_CITY: &str = "Local";
/// Country recorded for sessions opened from non-routable addresses.
pub const LOCAL_COUNTRY: &str = "Local Network";
/// Longest city or country name the record columns hold, in characters.
pub const MAX_PLACE_CHARS: usize = 100;

/// Why a geolocation lookup produced nothing.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("address {0} not found in geolocation database")]
    NotFound(IpAddr),

    #[error("geolocation unavailable: {0}")]
    Unavailable(String),
}

/// IP to place resolution.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn city(&self, ip: IpAddr) -> Result<String, LookupError>;
    async fn country(&self, ip: IpAddr) -> Result<String, LookupError>;
}

/// Geolocation that knows nothing. Every lookup misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullGeoLocator;

#[async_trait]
impl GeoLocator for NullGeoLocator {
    async fn city(&self, ip: IpAddr) -> Result<String, LookupError> {
        Err(LookupError::NotFound(ip))
    }

    async fn country(&self, ip: IpAddr) -> Result<String, LookupError> {
        Err(LookupError::NotFound(ip))
    }
}

/// Whether `ip` is a publicly routable address.
pub fn is_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            !(v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_multicast()
                // 100.64.0.0/10 carrier-grade NAT
                || (octets[0] == 100 && (64..=127).contains(&octets[1]))
                // 0.0.0.0/8
                || octets[0] == 0)
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_routable(IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            !(v6.is_unspecified()
                || v6.is_loopback()
                || v6.is_multicast()
                // fc00::/7 unique local
                || (first & 0xfe00) == 0xfc00
                // fe80::/10 link-local
                || (first & 0xffc0) == 0xfe80
                // 2001:db8::/32 documentation
                || (first == 0x2001 && v6.segments()[1] == 0x0db8))
        }
    }
}

/// The raw request facts the enricher works from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignals {
    pub client_ip: IpAddr,
    pub user_agent: String,
}

impl RequestSignals {
    /// Reads the client address and user agent from a request.
    ///
    /// The address is the first routable entry of `X-Forwarded-For`, else
    /// its first parseable entry, else `X-Real-IP`, else the socket peer,
    /// else `0.0.0.0`.
    ///
    /// # Arguments
    ///
    /// * `headers` - The request headers.
    /// * `peer` - The socket address from `ConnectInfo`, when the server provides it.
    pub fn from_request(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Self {
            client_ip: client_ip(headers, peer),
            user_agent,
        }
    }
}

fn parse_forwarded(value: &str) -> Option<IpAddr> {
    let value = value.trim();
    value
        .parse::<IpAddr>()
        .ok()
        .or_else(|| value.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
    let forwarded: Vec<IpAddr> = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').filter_map(parse_forwarded).collect())
        .unwrap_or_default();

    if let Some(ip) = forwarded.iter().copied().find(|ip| is_routable(*ip)) {
        return ip;
    }
    if let Some(ip) = forwarded.first() {
        return *ip;
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_forwarded)
        .or_else(|| peer.map(|addr| addr.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Turns request signals into the geo and device parts of a session record.
#[derive(Clone)]
pub struct MetadataEnricher {
    geo: Arc<dyn GeoLocator>,
    user_agents: Arc<dyn UserAgentParser>,
}

impl MetadataEnricher {
    pub fn new(geo: Arc<dyn GeoLocator>, user_agents: Arc<dyn UserAgentParser>) -> Self {
        Self { geo, user_agents }
    }

    /// Resolves where and what the session runs on.
    ///
    /// Non-routable addresses get the local placeholder without a lookup.
    /// Failed lookups leave city and country empty.
    pub async fn enrich(&self, signals: &RequestSignals) -> (GeoDescriptor, DeviceDescriptor) {
        (self.locate(signals.client_ip).await, self.describe(&signals.user_agent))
    }

    async fn locate(&self, ip: IpAddr) -> GeoDescriptor {
        if !is_routable(ip) {
            return GeoDescriptor {
                ip_address: ip,
                city: Some(LOCAL_CITY.to_string()),
                country: Some(LOCAL_COUNTRY.to_string()),
            };
        }

        let (city, country) = tokio::join!(self.geo.city(ip), self.geo.country(ip));

        GeoDescriptor {
            ip_address: ip,
            city: Self::degrade(city),
            country: Self::degrade(country),
        }
    }

    fn degrade(result: Result<String, LookupError>) -> Option<String> {
        match result {
            Ok(place) if place.chars().count() > MAX_PLACE_CHARS => {
                tracing::debug!("🌍 Truncating geolocation name of {} characters", place.chars().count());
                Some(place.chars().take(MAX_PLACE_CHARS).collect())
            }
            Ok(place) => Some(place),
            Err(LookupError::NotFound(ip)) => {
                tracing::debug!("🌍 No geolocation entry for {}", ip);
                None
            }
            Err(e) => {
                tracing::warn!("⚠️ Geolocation lookup failed: {}", e);
                None
            }
        }
    }

    fn describe(&self, user_agent: &str) -> DeviceDescriptor {
        let parsed = self.user_agents.parse(user_agent);

        DeviceDescriptor {
            browser_info: format!("{} {}", parsed.browser.family, parsed.browser.version_string),
            device_info: format!(
                "{} {} {}",
                parsed.device_family, parsed.os.family, parsed.os.version_string
            ),
        }
    }
}
