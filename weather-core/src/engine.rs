//! Concurrent fan-out to the provider adapters and fan-in of their results.
//!
//! Every allowed provider gets its own task bounded by its own timeout. All
//! outcomes are collected, in dispatch order, before anything is decided:
//! failures are logged and dropped from the merge, and only a request with
//! zero successes fails as a whole.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::{
    Config,
    aggregate::{align_days, merge_observations},
    error::{ProviderError, WeatherError},
    model::{
        CurrentAggregate, ForecastAggregate, ForecastDay, Location, ProviderFailure,
        SourceEnvelope, Units,
    },
    provider::{DEFAULT_TIMEOUT, ProviderId, ProviderRegistry, WeatherProvider},
};

pub const DEFAULT_FORECAST_DAYS: u8 = 5;
/// Longest forecast any provider offers.
pub const MAX_FORECAST_DAYS: u8 = 16;

/// Per-request knobs shared by the current and forecast variants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    pub units: Units,
    /// Allowlist; `None` means every provider.
    pub providers: Option<Vec<ProviderId>>,
}

impl AggregateOptions {
    /// Parse a comma separated provider list. Unknown names are skipped.
    pub fn parse_providers(list: &str) -> Vec<ProviderId> {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .filter_map(|name| match ProviderId::try_from(name) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(provider = %name, "{e}");
                    None
                }
            })
            .collect()
    }

    /// Providers to dispatch to, in dispatch order.
    pub fn selected(&self) -> Vec<ProviderId> {
        ProviderId::all()
            .iter()
            .copied()
            .filter(|id| self.providers.as_ref().is_none_or(|allow| allow.contains(id)))
            .collect()
    }
}

type Outcome<T> = Result<SourceEnvelope<T>, ProviderError>;

#[derive(Debug, Clone)]
pub struct Aggregator {
    registry: ProviderRegistry,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(ProviderRegistry::from_config(config)).with_timeout(config.provider_timeout())
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Current conditions merged across every provider that answered.
    #[instrument(skip(self, options), fields(units = %options.units))]
    pub async fn current(
        &self,
        lat: f64,
        lon: f64,
        options: &AggregateOptions,
    ) -> Result<CurrentAggregate, WeatherError> {
        validate_coordinates(lat, lon)?;
        let units = options.units;

        let outcomes = self
            .fan_out(options, move |provider| async move {
                provider.fetch_current(lat, lon, units).await
            })
            .await;
        let (sources, failures) = settle(outcomes);

        let Some(aggregated) = merge_observations(sources.iter().map(|s| &s.data)) else {
            return Err(WeatherError::NoProviderData { failures });
        };

        info!(sources = sources.len(), failed = failures.len(), "Merged current conditions");

        Ok(CurrentAggregate {
            location: first_location(lat, lon, &sources),
            timestamp: Utc::now(),
            failures: failures.iter().map(ProviderFailure::from).collect(),
            sources,
            aggregated,
        })
    }

    /// Day-aligned forecast for `days` days starting today.
    #[instrument(skip(self, options), fields(units = %options.units))]
    pub async fn forecast(
        &self,
        lat: f64,
        lon: f64,
        days: u8,
        options: &AggregateOptions,
    ) -> Result<ForecastAggregate, WeatherError> {
        validate_coordinates(lat, lon)?;
        let days = days.clamp(1, MAX_FORECAST_DAYS);
        let units = options.units;

        let outcomes = self
            .fan_out(options, move |provider| async move {
                provider.fetch_forecast(lat, lon, days, units).await
            })
            .await;
        let (sources, failures): (Vec<SourceEnvelope<Vec<ForecastDay>>>, _) = settle(outcomes);

        if sources.is_empty() {
            return Err(WeatherError::NoProviderData { failures });
        }

        let daily = align_days(&sources, Utc::now().date_naive(), days);

        info!(
            sources = sources.len(),
            failed = failures.len(),
            days = daily.len(),
            "Merged forecast"
        );

        Ok(ForecastAggregate {
            location: first_location(lat, lon, &sources),
            timestamp: Utc::now(),
            failures: failures.iter().map(ProviderFailure::from).collect(),
            sources,
            daily,
        })
    }

    /// Spawn one task per selected provider and wait for all of them.
    ///
    /// Results come back in dispatch order whatever order they finish in.
    async fn fan_out<T, F, Fut>(&self, options: &AggregateOptions, call: F) -> Vec<Outcome<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn WeatherProvider>) -> Fut,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        let timeout = self.timeout;

        let dispatched: Vec<(ProviderId, Result<JoinHandle<Outcome<T>>, ProviderError>)> = options
            .selected()
            .into_iter()
            .map(|id| {
                let handle = match self.registry.get(id) {
                    Some(provider) => {
                        let call = call(Arc::clone(provider));
                        Ok(tokio::spawn(async move {
                            match tokio::time::timeout(timeout, call).await {
                                Ok(outcome) => outcome,
                                Err(_) => Err(ProviderError::Timeout {
                                    provider: id,
                                    timeout,
                                }),
                            }
                        }))
                    }
                    None => Err(ProviderError::NotConfigured { provider: id }),
                };
                (id, handle)
            })
            .collect();

        join_all(dispatched.into_iter().map(|(id, handle)| async move {
            match handle {
                Ok(handle) => handle.await.unwrap_or_else(|e| {
                    Err(ProviderError::Internal {
                        provider: id,
                        message: e.to_string(),
                    })
                }),
                Err(e) => Err(e),
            }
        }))
        .await
    }
}

/// Split settled outcomes into successes and logged failures.
fn settle<T>(outcomes: Vec<Outcome<T>>) -> (Vec<SourceEnvelope<T>>, Vec<ProviderError>) {
    let mut sources = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();

    for outcome in outcomes {
        match outcome {
            Ok(source) => sources.push(source),
            Err(err) => {
                warn!(provider = %err.provider(), error = %err, "Provider excluded from merge");
                failures.push(err);
            }
        }
    }

    (sources, failures)
}

/// Location descriptor from the first successful source that names one.
fn first_location<T>(lat: f64, lon: f64, sources: &[SourceEnvelope<T>]) -> Location {
    let mut location = Location::at(lat, lon);
    if let Some(place) = sources.iter().find_map(|s| s.place.as_ref()) {
        location.adopt(place);
    }
    location
}

fn validate_coordinates(lat: f64, lon: f64) -> Result<(), WeatherError> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(WeatherError::InvalidParameter(format!(
            "coordinates out of range: lat={lat}, lon={lon} (latitude must be -90 to 90, longitude -180 to 180)"
        )));
    }
    Ok(())
}
