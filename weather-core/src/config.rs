use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use crate::provider::ProviderId;

pub const CACHE_TTL_ENV: &str = "CACHE_TTL";
pub const PORT_ENV: &str = "PORT";
pub const EXPOSE_ERROR_DETAILS_ENV: &str = "EXPOSE_ERROR_DETAILS";

/// Configuration for a single provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
    /// Overrides the provider's public endpoint (mock servers, proxies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeocodingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// Fraction of the TTL between expiry sweeps.
    pub check_period_ratio: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 1800,
            check_period_ratio: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Include per-provider failure reasons in error bodies. Turn off in production.
    pub expose_error_details: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            expose_error_details: true,
        }
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// provider_timeout_secs = 5
///
/// [providers.openweather]
/// api_key = "..."
///
/// [cache]
/// ttl_secs = 1800
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: HashMap<String, ProviderConfig>,
    pub geocoding: GeocodingConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    pub provider_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            geocoding: GeocodingConfig::default(),
            cache: CacheConfig::default(),
            server: ServerConfig::default(),
            provider_timeout_secs: 5,
        }
    }
}

impl Config {
    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    /// Load config from disk, or return defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-aggregator", "weather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Overlay values from `lookup`. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        for id in ProviderId::all() {
            if let Some(key) = var(id.api_key_env()) {
                self.upsert_provider_api_key(*id, key);
            }
        }

        if let Some(ttl) = var(CACHE_TTL_ENV) {
            self.cache.ttl_secs = ttl
                .trim()
                .parse()
                .with_context(|| format!("{CACHE_TTL_ENV} must be a number of seconds, got '{ttl}'"))?;
        }

        if let Some(port) = var(PORT_ENV) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("{PORT_ENV} must be a port number, got '{port}'"))?;
        }

        if let Some(expose) = var(EXPOSE_ERROR_DETAILS_ENV) {
            self.server.expose_error_details = expose.trim().parse().with_context(|| {
                format!("{EXPOSE_ERROR_DETAILS_ENV} must be true or false, got '{expose}'")
            })?;
        }

        Ok(())
    }

    /// Set or replace a provider API key, keeping any base URL override.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        match self.providers.get_mut(provider_id.as_str()) {
            Some(cfg) => cfg.api_key = api_key,
            None => {
                self.providers.insert(
                    provider_id.as_str().to_string(),
                    ProviderConfig {
                        api_key,
                        base_url: None,
                    },
                );
            }
        }
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.provider_config(provider_id).map(|cfg| cfg.api_key.as_str())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }

    /// Providers with a credential, in dispatch order.
    pub fn configured_providers(&self) -> Vec<ProviderId> {
        ProviderId::all()
            .iter()
            .copied()
            .filter(|id| self.is_provider_configured(*id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let pairs: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| pairs.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();

        assert_eq!(cfg.cache_ttl(), Duration::from_secs(1800));
        assert_eq!(cfg.cache.check_period_ratio, 0.2);
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.provider_timeout(), Duration::from_secs(5));
        assert!(cfg.configured_providers().is_empty());
    }

    #[test]
    fn set_api_key_for_provider() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN_KEY".into());

        let key = cfg.provider_api_key(ProviderId::OpenWeather);
        assert_eq!(key, Some("OPEN_KEY"));
        assert!(cfg.is_provider_configured(ProviderId::OpenWeather));
        assert!(!cfg.is_provider_configured(ProviderId::WeatherBit));
    }

    #[test]
    fn upsert_keeps_base_url_override() {
        let mut cfg = Config::from_toml(
            r#"
            [providers.weatherapi]
            api_key = "old"
            base_url = "http://localhost:9999"
            "#,
        )
        .unwrap();

        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "new".into());

        let provider = cfg.provider_config(ProviderId::WeatherApi).unwrap();
        assert_eq!(provider.api_key, "new");
        assert_eq!(provider.base_url.as_deref(), Some("http://localhost:9999"));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg = Config::from_toml(
            r#"
            [cache]
            ttl_secs = 60

            [providers.weatherbit]
            api_key = "WB"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.cache.ttl_secs, 60);
        assert_eq!(cfg.cache.check_period_ratio, 0.2);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.configured_providers(), vec![ProviderId::WeatherBit]);
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "FROM_FILE".into());

        cfg.apply_env_from(env(&[
            ("OPENWEATHER_API_KEY", "FROM_ENV"),
            ("WEATHERBIT_API_KEY", ""),
            ("CACHE_TTL", "120"),
            ("PORT", "8080"),
        ]))
        .unwrap();

        assert_eq!(cfg.provider_api_key(ProviderId::OpenWeather), Some("FROM_ENV"));
        assert!(!cfg.is_provider_configured(ProviderId::WeatherBit));
        assert_eq!(cfg.cache.ttl_secs, 120);
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn error_details_can_be_switched_off() {
        let mut cfg = Config::default();
        assert!(cfg.server.expose_error_details);

        cfg.apply_env_from(env(&[("EXPOSE_ERROR_DETAILS", "false")]))
            .unwrap();
        assert!(!cfg.server.expose_error_details);

        let err = cfg
            .apply_env_from(env(&[("EXPOSE_ERROR_DETAILS", "nope")]))
            .unwrap_err();
        assert!(err.to_string().contains("EXPOSE_ERROR_DETAILS"));
    }

    #[test]
    fn malformed_port_is_an_error() {
        let mut cfg = Config::default();
        let err = cfg.apply_env_from(env(&[("PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn round_trips_through_toml() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "KEY".into());
        cfg.server.port = 4000;

        let text = toml::to_string_pretty(&cfg).unwrap();
        assert_eq!(Config::from_toml(&text).unwrap(), cfg);
    }
}
