use async_trait::async_trait;
use maxminddb::{geoip2, MaxMindDBError, Reader};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::services::enricher::{GeoLocator, LookupError};

/// Language of the place names taken from the database.
const NAME_LANGUAGE: &str = "en";

/// Geolocation backed by a MaxMind GeoIP2/GeoLite2 City database.
#[derive(Clone)]
pub struct MaxMindGeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MaxMindGeoLocator {
    /// Loads the database at `path` into memory.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of a `.mmdb` City database.
    ///
    /// # Returns
    ///
    /// A `Result` containing the locator, or `AppError::Internal` when the
    /// file is missing or is not a MaxMind database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path).map_err(|e| {
            AppError::Internal(format!("Cannot open GeoIP database {}: {}", path.display(), e))
        })?;

        tracing::info!(
            "🌍 GeoIP database loaded ({}, built {})",
            reader.metadata.database_type,
            reader.metadata.build_epoch
        );

        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    fn lookup(&self, ip: IpAddr) -> std::result::Result<geoip2::City<'_>, LookupError> {
        self.reader
            .lookup::<geoip2::City>(ip)
            .map_err(|e| lookup_error(ip, e))
    }
}

fn lookup_error(ip: IpAddr, error: MaxMindDBError) -> LookupError {
    match error {
        MaxMindDBError::AddressNotFoundError(_) => LookupError::NotFound(ip),
        other => LookupError::Unavailable(other.to_string()),
    }
}

fn preferred_name(
    ip: IpAddr,
    names: Option<BTreeMap<&str, &str>>,
) -> std::result::Result<String, LookupError> {
    names
        .and_then(|names| names.get(NAME_LANGUAGE).map(|name| name.to_string()))
        .ok_or(LookupError::NotFound(ip))
}

#[async_trait]
impl GeoLocator for MaxMindGeoLocator {
    async fn city(&self, ip: IpAddr) -> std::result::Result<String, LookupError> {
        let record = self.lookup(ip)?;
        preferred_name(ip, record.city.and_then(|city| city.names))
    }

    async fn country(&self, ip: IpAddr) -> std::result::Result<String, LookupError> {
        let record = self.lookup(ip)?;
        preferred_name(ip, record.country.and_then(|country| country.names))
    }
}
