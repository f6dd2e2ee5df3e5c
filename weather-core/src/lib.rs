//! Core library for the weather aggregator.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Provider adapters that normalise each upstream API into one [`Observation`] shape
//! - The aggregation engine (concurrent fan-out, statistical merge, day alignment)
//! - A TTL response cache and the [`WeatherService`] facade that ties it all together
//!
//! It is used by `weather-cli` and `weather-server`.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod geocode;
pub mod model;
pub mod provider;
pub mod service;

pub use cache::{CacheStats, ResponseCache, cache_key};
pub use config::{Config, ProviderConfig};
pub use engine::{AggregateOptions, Aggregator, DEFAULT_FORECAST_DAYS, MAX_FORECAST_DAYS};
pub use error::{ErrorClass, ProviderError, WeatherError};
pub use geocode::{GeoPlace, Geocoder, OpenWeatherGeocoder};
pub use model::{
    AggregationResult, CurrentAggregate, ForecastAggregate, ForecastDay, Location, Observation,
    Units,
};
pub use provider::{ProviderId, ProviderRegistry, WeatherProvider};
pub use service::{Mode, Served, Target, WeatherQuery, WeatherService};
