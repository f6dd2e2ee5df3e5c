//! Place-name and postal-code lookup.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    Config,
    error::{ProviderError, WeatherError},
    provider::{DEFAULT_TIMEOUT, HttpSource, ProviderId},
};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/geo/1.0";
pub const DEFAULT_ZIP_COUNTRY: &str = "US";

/// A geocoded place with its coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPlace {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
}

#[async_trait]
pub trait Geocoder: Send + Sync + Debug {
    /// Candidate places for a city name, most relevant first. Never empty.
    async fn resolve_city(
        &self,
        name: &str,
        country: Option<&str>,
    ) -> Result<Vec<GeoPlace>, WeatherError>;

    async fn resolve_zip(&self, code: &str, country: &str) -> Result<GeoPlace, WeatherError>;
}

/// OpenWeatherMap's geocoding API. Uses the openweather credential.
#[derive(Debug, Clone)]
pub struct OpenWeatherGeocoder {
    api_key: Option<String>,
    source: HttpSource,
}

#[derive(Debug, Deserialize)]
struct DirectMatch {
    name: String,
    lat: f64,
    lon: f64,
    country: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZipMatch {
    name: String,
    lat: f64,
    lon: f64,
    country: Option<String>,
}

impl OpenWeatherGeocoder {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    pub fn with_base_url(api_key: Option<String>, base_url: &str, timeout: Duration) -> Self {
        Self {
            api_key,
            source: HttpSource::new(ProviderId::OpenWeather, base_url, timeout),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_base_url(
            config.provider_api_key(ProviderId::OpenWeather).map(str::to_string),
            config.geocoding.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
            config.provider_timeout(),
        )
    }

    fn api_key(&self) -> Result<String, WeatherError> {
        self.api_key.clone().ok_or_else(|| WeatherError::Geocoding {
            message: format!("no API key configured for {}", ProviderId::OpenWeather),
            timed_out: false,
        })
    }
}

fn lookup_error(err: ProviderError, target: String) -> WeatherError {
    match err {
        ProviderError::Status { status: 404, .. } => WeatherError::LocationNotFound(target),
        other => WeatherError::Geocoding {
            timed_out: other.is_timeout(),
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl Geocoder for OpenWeatherGeocoder {
    #[instrument(skip(self))]
    async fn resolve_city(
        &self,
        name: &str,
        country: Option<&str>,
    ) -> Result<Vec<GeoPlace>, WeatherError> {
        let q = match country.filter(|c| !c.is_empty()) {
            Some(country) => format!("{name},{country}"),
            None => name.to_string(),
        };
        let query = [
            ("q", q),
            ("limit", "5".to_string()),
            ("appid", self.api_key()?),
        ];

        let matches: Vec<DirectMatch> = self
            .source
            .get_json("direct", &query)
            .await
            .map_err(|e| lookup_error(e, format!("city: {name}")))?;

        debug!(count = matches.len(), "Geocoded city");

        if matches.is_empty() {
            return Err(WeatherError::LocationNotFound(format!("city: {name}")));
        }

        Ok(matches
            .into_iter()
            .map(|m| GeoPlace {
                name: m.name,
                lat: m.lat,
                lon: m.lon,
                country: m.country,
                state: m.state,
                zip: None,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn resolve_zip(&self, code: &str, country: &str) -> Result<GeoPlace, WeatherError> {
        let query = [
            ("zip", format!("{code},{country}")),
            ("appid", self.api_key()?),
        ];

        let found: ZipMatch = self
            .source
            .get_json("zip", &query)
            .await
            .map_err(|e| lookup_error(e, format!("zip code: {code}")))?;

        Ok(GeoPlace {
            name: found.name,
            lat: found.lat,
            lon: found.lon,
            country: found.country,
            state: None,
            zip: Some(code.to_string()),
        })
    }
}
