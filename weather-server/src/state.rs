//! Application state shared across handlers

use std::sync::Arc;

use weather_core::{Config, ResponseCache, WeatherService};

/// Shared application state
#[derive(Debug, Clone)]
pub struct AppState {
    /// Geocoding, cache and aggregation behind one facade
    pub service: WeatherService,
}

impl AppState {
    pub fn new(service: WeatherService) -> Self {
        Self { service }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(WeatherService::from_config(config))
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        self.service.cache()
    }
}
