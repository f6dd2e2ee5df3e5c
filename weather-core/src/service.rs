//! Front door for callers: geocoding, the response cache and the engine.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
    Config,
    cache::ResponseCache,
    engine::{AggregateOptions, Aggregator},
    error::WeatherError,
    geocode::{GeoPlace, Geocoder, OpenWeatherGeocoder},
    model::{AggregationResult, Location},
};

/// What to look up.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Coordinates { lat: f64, lon: f64 },
    City { name: String, country: Option<String> },
    Zip { code: String, country: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Current,
    Forecast { days: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherQuery {
    pub target: Target,
    pub mode: Mode,
    pub options: AggregateOptions,
}

/// A result plus whether it was served from the cache.
#[derive(Debug, Clone)]
pub struct Served {
    pub result: Arc<AggregationResult>,
    pub from_cache: bool,
}

#[derive(Debug, Clone)]
pub struct WeatherService {
    aggregator: Aggregator,
    geocoder: Arc<dyn Geocoder>,
    cache: Arc<ResponseCache>,
}

impl WeatherService {
    pub fn new(
        aggregator: Aggregator,
        geocoder: Arc<dyn Geocoder>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            aggregator,
            geocoder,
            cache,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Aggregator::from_config(config),
            Arc::new(OpenWeatherGeocoder::from_config(config)),
            Arc::new(ResponseCache::from_config(config)),
        )
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Answer `query` from the cache, or resolve it and cache the result.
    ///
    /// Only successful results are cached.
    #[instrument(skip(self, query))]
    pub async fn fetch(&self, key: &str, query: &WeatherQuery) -> Result<Served, WeatherError> {
        if let Some(entry) = self.cache.get(key).await {
            return Ok(Served {
                result: entry.result,
                from_cache: true,
            });
        }

        let result = Arc::new(self.resolve(query).await?);
        self.cache.put(key, Arc::clone(&result)).await;

        Ok(Served {
            result,
            from_cache: false,
        })
    }

    /// Run `query` against the providers, bypassing the cache.
    pub async fn resolve(&self, query: &WeatherQuery) -> Result<AggregationResult, WeatherError> {
        match &query.target {
            Target::Coordinates { lat, lon } => self.run(*lat, *lon, query).await,
            Target::City { name, country } => {
                let places = self.geocoder.resolve_city(name, country.as_deref()).await?;
                let place = places
                    .into_iter()
                    .next()
                    .ok_or_else(|| WeatherError::LocationNotFound(format!("city: {name}")))?;
                debug!(name = %place.name, lat = place.lat, lon = place.lon, "Resolved city");

                let mut result = self.run(place.lat, place.lon, query).await?;
                overlay_city(result.location_mut(), place);
                Ok(result)
            }
            Target::Zip { code, country } => {
                let place = self.geocoder.resolve_zip(code, country).await?;
                debug!(name = %place.name, lat = place.lat, lon = place.lon, "Resolved zip code");

                let mut result = self.run(place.lat, place.lon, query).await?;
                overlay_zip(result.location_mut(), place, code);
                Ok(result)
            }
        }
    }

    async fn run(
        &self,
        lat: f64,
        lon: f64,
        query: &WeatherQuery,
    ) -> Result<AggregationResult, WeatherError> {
        Ok(match query.mode {
            Mode::Current => AggregationResult::Current(
                self.aggregator.current(lat, lon, &query.options).await?,
            ),
            Mode::Forecast { days } => AggregationResult::Forecast(
                self.aggregator
                    .forecast(lat, lon, days, &query.options)
                    .await?,
            ),
        })
    }
}

/// Geocoded names win over whatever the providers reported.
fn overlay_city(location: &mut Location, place: GeoPlace) {
    location.name = Some(place.name);
    location.country = place.country;
    location.state = place.state;
}

fn overlay_zip(location: &mut Location, place: GeoPlace, code: &str) {
    location.name = Some(place.name);
    location.country = place.country;
    location.zip = Some(code.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ProviderError,
        model::{ForecastDay, Observation, Place, SourceEnvelope, Units},
        provider::{ProviderId, ProviderRegistry, WeatherProvider},
    };
    use async_trait::async_trait;
    use std::{
        ops::RangeInclusive,
        sync::atomic::{AtomicUsize, Ordering},
    };

    #[derive(Debug, Default)]
    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl WeatherProvider for CountingProvider {
        fn id(&self) -> ProviderId {
            ProviderId::OpenWeather
        }

        fn forecast_days(&self) -> RangeInclusive<u8> {
            1..=5
        }

        async fn fetch_current(
            &self,
            lat: f64,
            _lon: f64,
            _units: Units,
        ) -> Result<SourceEnvelope<Observation>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Connect {
                    provider: ProviderId::OpenWeather,
                    message: "refused".into(),
                });
            }
            let observation = Observation {
                temp: Some(lat),
                ..Observation::default()
            };
            Ok(SourceEnvelope::new(ProviderId::OpenWeather, observation).with_place(Some(Place {
                name: "Provider Name".into(),
                country: Some("ZZ".into()),
                ..Place::default()
            })))
        }

        async fn fetch_forecast(
            &self,
            _lat: f64,
            _lon: f64,
            _days: u8,
            _units: Units,
        ) -> Result<SourceEnvelope<Vec<ForecastDay>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SourceEnvelope::new(ProviderId::OpenWeather, Vec::new()))
        }
    }

    #[derive(Debug)]
    struct FixedGeocoder;

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn resolve_city(
            &self,
            name: &str,
            _country: Option<&str>,
        ) -> Result<Vec<GeoPlace>, WeatherError> {
            if name == "Atlantis" {
                return Err(WeatherError::LocationNotFound(format!("city: {name}")));
            }
            Ok(vec![
                GeoPlace {
                    name: "Springfield".into(),
                    lat: 39.8,
                    lon: -89.6,
                    country: Some("US".into()),
                    state: Some("Illinois".into()),
                    zip: None,
                },
                GeoPlace {
                    name: "Springfield".into(),
                    lat: 37.2,
                    lon: -93.3,
                    country: Some("US".into()),
                    state: Some("Missouri".into()),
                    zip: None,
                },
            ])
        }

        async fn resolve_zip(&self, code: &str, _country: &str) -> Result<GeoPlace, WeatherError> {
            Ok(GeoPlace {
                name: "Beverly Hills".into(),
                lat: 34.07,
                lon: -118.4,
                country: Some("US".into()),
                state: None,
                zip: Some(code.to_string()),
            })
        }
    }

    fn service(provider: Arc<CountingProvider>) -> WeatherService {
        let registry = ProviderRegistry::new().with(provider as Arc<dyn WeatherProvider>);
        WeatherService::new(
            Aggregator::new(registry),
            Arc::new(FixedGeocoder),
            Arc::new(ResponseCache::default()),
        )
    }

    fn query(target: Target) -> WeatherQuery {
        WeatherQuery {
            target,
            mode: Mode::Current,
            options: AggregateOptions {
                providers: Some(vec![ProviderId::OpenWeather]),
                ..AggregateOptions::default()
            },
        }
    }

    #[tokio::test]
    async fn city_lookup_uses_first_match_and_overlays_its_names() {
        let svc = service(Arc::new(CountingProvider::default()));

        let result = svc
            .resolve(&query(Target::City {
                name: "Springfield".into(),
                country: None,
            }))
            .await
            .unwrap();

        let location = result.location();
        assert_eq!(location.name.as_deref(), Some("Springfield"));
        assert_eq!(location.state.as_deref(), Some("Illinois"));
        assert_eq!(location.country.as_deref(), Some("US"));
        assert_eq!(location.lat, 39.8);
    }

    #[tokio::test]
    async fn zip_lookup_records_the_code() {
        let svc = service(Arc::new(CountingProvider::default()));

        let result = svc
            .resolve(&query(Target::Zip {
                code: "90210".into(),
                country: "US".into(),
            }))
            .await
            .unwrap();

        let location = result.location();
        assert_eq!(location.name.as_deref(), Some("Beverly Hills"));
        assert_eq!(location.zip.as_deref(), Some("90210"));
    }

    #[tokio::test]
    async fn unknown_city_is_not_found() {
        let svc = service(Arc::new(CountingProvider::default()));

        let err = svc
            .resolve(&query(Target::City {
                name: "Atlantis".into(),
                country: None,
            }))
            .await
            .unwrap_err();

        assert!(matches!(err, WeatherError::LocationNotFound(_)));
    }

    #[tokio::test]
    async fn second_fetch_is_served_from_cache() {
        let provider = Arc::new(CountingProvider::default());
        let svc = service(provider.clone());
        let q = query(Target::Coordinates { lat: 10.0, lon: 20.0 });

        let first = svc.fetch("/current?lat=10&lon=20", &q).await.unwrap();
        let second = svc.fetch("/current?lat=10&lon=20", &q).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.result, second.result);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let provider = Arc::new(CountingProvider {
            fail: true,
            ..CountingProvider::default()
        });
        let svc = service(provider.clone());
        let q = query(Target::Coordinates { lat: 1.0, lon: 2.0 });

        assert!(svc.fetch("k", &q).await.is_err());
        assert!(svc.fetch("k", &q).await.is_err());

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!(svc.cache().stats().await.keys.is_empty());
    }
}
