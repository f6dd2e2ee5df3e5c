use crate::{
    Config,
    error::ProviderError,
    model::{ForecastDay, Observation, SourceEnvelope, Units},
    provider::{
        openweather::OpenWeatherProvider, weatherapi::WeatherApiProvider,
        weatherbit::WeatherBitProvider,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    collections::{BTreeMap, HashMap},
    convert::TryFrom,
    fmt::Debug,
    ops::RangeInclusive,
    sync::Arc,
    time::Duration,
};
use tracing::debug;

pub mod openweather;
pub mod weatherapi;
pub mod weatherbit;

/// Outbound call budget per provider request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
    WeatherBit,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
            ProviderId::WeatherBit => "weatherbit",
        }
    }

    /// All providers, in dispatch order.
    pub const fn all() -> &'static [ProviderId] {
        &[
            ProviderId::OpenWeather,
            ProviderId::WeatherApi,
            ProviderId::WeatherBit,
        ]
    }

    /// Environment variable carrying this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "OPENWEATHER_API_KEY",
            ProviderId::WeatherApi => "WEATHERAPI_API_KEY",
            ProviderId::WeatherBit => "WEATHERBIT_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.trim().to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            "weatherbit" => Ok(ProviderId::WeatherBit),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi, weatherbit."
            )),
        }
    }
}

/// One weather source, normalised into the canonical model.
///
/// Implementations issue exactly one outbound call per method and never
/// retry. Anything that goes wrong is reported as a [`ProviderError`].
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    /// Forecast lengths (in days) the provider accepts.
    fn forecast_days(&self) -> RangeInclusive<u8>;

    fn clamp_days(&self, days: u8) -> u8 {
        let range = self.forecast_days();
        days.clamp(*range.start(), *range.end())
    }

    async fn fetch_current(
        &self,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> Result<SourceEnvelope<Observation>, ProviderError>;

    async fn fetch_forecast(
        &self,
        lat: f64,
        lon: f64,
        days: u8,
        units: Units,
    ) -> Result<SourceEnvelope<Vec<ForecastDay>>, ProviderError>;
}

/// Static mapping from [`ProviderId`] to its adapter.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, Arc<dyn WeatherProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own id, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn WeatherProvider>) {
        self.providers.insert(provider.id(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn WeatherProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, id: ProviderId) -> Option<&Arc<dyn WeatherProvider>> {
        self.providers.get(&id)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Build adapters for every provider that has an API key configured.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for id in ProviderId::all() {
            if let Ok(provider) = provider_from_config(*id, config) {
                registry.register(provider);
            }
        }
        registry
    }
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let provider_cfg = config.provider_config(id).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: run `weather configure {id}` and enter your API key."
        )
    })?;

    let api_key = provider_cfg.api_key.clone();
    let base_url = provider_cfg.base_url.as_deref();
    let timeout = config.provider_timeout();

    let provider: Arc<dyn WeatherProvider> = match id {
        ProviderId::OpenWeather => Arc::new(OpenWeatherProvider::with_base_url(
            api_key,
            base_url.unwrap_or(openweather::DEFAULT_BASE_URL),
            timeout,
        )),
        ProviderId::WeatherApi => Arc::new(WeatherApiProvider::with_base_url(
            api_key,
            base_url.unwrap_or(weatherapi::DEFAULT_BASE_URL),
            timeout,
        )),
        ProviderId::WeatherBit => Arc::new(WeatherBitProvider::with_base_url(
            api_key,
            base_url.unwrap_or(weatherbit::DEFAULT_BASE_URL),
            timeout,
        )),
    };

    Ok(provider)
}

/// Shared HTTP plumbing for the adapters: base URL, timeout, error mapping.
#[derive(Debug, Clone)]
pub(crate) struct HttpSource {
    provider: ProviderId,
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl HttpSource {
    pub(crate) fn new(provider: ProviderId, base_url: &str, timeout: Duration) -> Self {
        Self {
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            http: Client::new(),
        }
    }

    /// GET `{base_url}/{path}` and decode the JSON body into `T`.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(provider = %self.provider, url = %url, "Fetching provider data");

        let res = self
            .http
            .get(&url)
            .query(query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(self.provider, self.timeout, e))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| ProviderError::from_transport(self.provider, self.timeout, e))?;

        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: self.provider,
                status: status.as_u16(),
                message: upstream_message(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| self.malformed(e.to_string()))
    }

    pub(crate) fn malformed(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::Malformed {
            provider: self.provider,
            message: message.into(),
        }
    }
}

/// Pull the human-readable message out of a provider error body.
///
/// Providers disagree on the shape: `{"message": ..}`, `{"error": ..}` or
/// `{"error": {"message": ..}}`. Anything else falls back to the raw body.
fn upstream_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let message = value
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| value.get("error").and_then(|e| e.as_str()))
            .or_else(|| {
                value
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
            });
        if let Some(message) = message {
            return message.to_string();
        }
    }
    truncate_body(body)
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

pub(crate) fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

/// The sample whose local timestamp is closest to noon on `date`.
///
/// Ties go to the earlier sample in iteration order.
pub(crate) fn closest_to_noon<T>(
    date: NaiveDate,
    samples: impl IntoIterator<Item = (NaiveDateTime, T)>,
) -> Option<T> {
    let noon = date.and_hms_opt(12, 0, 0)?;
    samples
        .into_iter()
        .min_by_key(|(at, _)| (*at - noon).num_seconds().abs())
        .map(|(_, sample)| sample)
}

/// Collapse sub-daily samples (local time) into one per calendar date,
/// ordered by date.
pub(crate) fn representative_per_day<T>(
    samples: impl IntoIterator<Item = (NaiveDateTime, T)>,
) -> Vec<(NaiveDate, T)> {
    let mut by_day: BTreeMap<NaiveDate, Vec<(NaiveDateTime, T)>> = BTreeMap::new();
    for (at, sample) in samples {
        by_day.entry(at.date()).or_default().push((at, sample));
    }

    by_day
        .into_iter()
        .filter_map(|(date, samples)| closest_to_noon(date, samples).map(|s| (date, s)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn provider_id_as_str_roundtrip() {
        for id in ProviderId::all() {
            let s = id.as_str();
            let parsed = ProviderId::try_from(s).expect("roundtrip should succeed");
            assert_eq!(*id, parsed);
        }
    }

    #[test]
    fn provider_id_parse_ignores_case_and_whitespace() {
        assert_eq!(
            ProviderId::try_from(" WeatherBit ").unwrap(),
            ProviderId::WeatherBit
        );
    }

    #[test]
    fn unknown_provider_error() {
        let err = ProviderId::try_from("doesnotexist").unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn provider_from_config_errors_when_missing_api_key() {
        let cfg = Config::default();
        let err = provider_from_config(ProviderId::OpenWeather, &cfg).unwrap_err();
        assert!(err.to_string().contains("No API key configured for provider"));
    }

    #[test]
    fn registry_only_holds_configured_providers() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherBit, "KEY".to_string());

        let registry = ProviderRegistry::from_config(&cfg);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(ProviderId::WeatherBit).is_some());
        assert!(registry.get(ProviderId::OpenWeather).is_none());
    }

    #[test]
    fn clamp_days_uses_advertised_range() {
        let provider = OpenWeatherProvider::new("KEY".into());
        assert_eq!(provider.clamp_days(0), 1);
        assert_eq!(provider.clamp_days(3), 3);
        assert_eq!(provider.clamp_days(9), 5);
    }

    #[test]
    fn upstream_message_shapes() {
        assert_eq!(
            upstream_message(r#"{"cod":401,"message":"Invalid API key"}"#),
            "Invalid API key"
        );
        assert_eq!(
            upstream_message(r#"{"error":{"code":1006,"message":"No matching location found."}}"#),
            "No matching location found."
        );
        assert_eq!(upstream_message(r#"{"error":"API key not valid"}"#), "API key not valid");
        assert_eq!(upstream_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let body = "é".repeat(250);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), 203);
    }

    #[test]
    fn closest_to_noon_picks_nearest_sample() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let samples = vec![
            (at("2024-01-15", "09:00"), "09"),
            (at("2024-01-15", "12:00"), "12"),
            (at("2024-01-15", "15:00"), "15"),
        ];
        assert_eq!(closest_to_noon(date, samples), Some("12"));
    }

    #[test]
    fn closest_to_noon_prefers_earlier_on_tie() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let samples = vec![
            (at("2024-01-15", "10:30"), "morning"),
            (at("2024-01-15", "13:30"), "afternoon"),
        ];
        assert_eq!(closest_to_noon(date, samples), Some("morning"));
    }

    #[test]
    fn representative_per_day_groups_and_orders() {
        let samples = vec![
            (at("2024-01-16", "00:00"), "16-00"),
            (at("2024-01-15", "21:00"), "15-21"),
            (at("2024-01-16", "12:00"), "16-12"),
            (at("2024-01-15", "18:00"), "15-18"),
        ];
        let days = representative_per_day(samples);
        let picked: Vec<_> = days.iter().map(|(_, s)| *s).collect();
        assert_eq!(picked, vec!["15-18", "16-12"]);
    }
}
