use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::{ops::RangeInclusive, time::Duration};
use tracing::instrument;

use crate::{
    error::ProviderError,
    model::{ForecastDay, Observation, Place, SourceEnvelope, Units},
    provider::{DEFAULT_TIMEOUT, HttpSource, ProviderId, closest_to_noon},
};

use super::WeatherProvider;

pub const DEFAULT_BASE_URL: &str = "https://api.weatherapi.com/v1";

/// WeatherAPI.com: current conditions plus up to 10 days of hourly forecast.
#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    source: HttpSource,
}

impl WeatherApiProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    pub fn with_base_url(api_key: String, base_url: &str, timeout: Duration) -> Self {
        Self {
            api_key,
            source: HttpSource::new(ProviderId::WeatherApi, base_url, timeout),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WaLocation {
    name: Option<String>,
    region: Option<String>,
    country: Option<String>,
}

impl WaLocation {
    fn place(&self) -> Option<Place> {
        self.name.clone().map(|name| Place {
            name,
            country: self.country.clone(),
            region: self.region.clone().filter(|r| !r.is_empty()),
            ..Place::default()
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct WaCondition {
    text: Option<String>,
    icon: Option<String>,
}

/// Field set shared by `current` and the hourly forecast entries.
#[derive(Debug, Default, Deserialize)]
struct WaConditions {
    temp_c: Option<f64>,
    feelslike_c: Option<f64>,
    humidity: Option<f64>,
    pressure_mb: Option<f64>,
    wind_kph: Option<f64>,
    wind_degree: Option<f64>,
    #[serde(default)]
    condition: WaCondition,
    cloud: Option<f64>,
    uv: Option<f64>,
    vis_km: Option<f64>,
    precip_mm: Option<f64>,
    snow_cm: Option<f64>,
    is_day: Option<u8>,
}

impl WaConditions {
    fn normalize(&self) -> Observation {
        Observation {
            temp: self.temp_c,
            feels_like: self.feelslike_c,
            humidity: self.humidity,
            pressure: self.pressure_mb,
            wind_speed: self.wind_kph,
            wind_direction: self.wind_degree,
            description: self.condition.text.clone(),
            condition: self.condition.text.clone(),
            icon: self.condition.icon.clone(),
            clouds: self.cloud,
            uv_index: self.uv,
            visibility: self.vis_km,
            rain_1h: Some(self.precip_mm.unwrap_or(0.0)),
            snow_1h: self.snow_cm.map(|cm| cm * 10.0),
            aqi: None,
            is_day: self.is_day.map(|d| d == 1),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WaResponse {
    #[serde(default)]
    location: WaLocation,
    current: WaConditions,
}

#[derive(Debug, Default, Deserialize)]
struct WaDaySummary {
    avgtemp_c: Option<f64>,
    avghumidity: Option<f64>,
    maxwind_kph: Option<f64>,
    totalprecip_mm: Option<f64>,
    totalsnow_cm: Option<f64>,
    avgvis_km: Option<f64>,
    uv: Option<f64>,
    #[serde(default)]
    condition: WaCondition,
}

impl WaDaySummary {
    /// Fallback when a day carries no hourly samples. Totals become hourly means.
    fn normalize(&self) -> Observation {
        Observation {
            temp: self.avgtemp_c,
            humidity: self.avghumidity,
            wind_speed: self.maxwind_kph,
            description: self.condition.text.clone(),
            condition: self.condition.text.clone(),
            icon: self.condition.icon.clone(),
            uv_index: self.uv,
            visibility: self.avgvis_km,
            rain_1h: Some(self.totalprecip_mm.unwrap_or(0.0) / 24.0),
            snow_1h: self.totalsnow_cm.map(|cm| cm * 10.0 / 24.0),
            ..Observation::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct WaHour {
    /// Local time, `YYYY-MM-DD HH:MM`.
    time: String,
    #[serde(flatten)]
    conditions: WaConditions,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date: NaiveDate,
    #[serde(default)]
    day: WaDaySummary,
    #[serde(default)]
    hour: Vec<WaHour>,
}

impl WaForecastDay {
    fn representative(&self) -> Observation {
        let hours = self.hour.iter().filter_map(|h| {
            NaiveDateTime::parse_from_str(&h.time, "%Y-%m-%d %H:%M")
                .ok()
                .map(|at| (at, h))
        });

        match closest_to_noon(self.date, hours) {
            Some(hour) => hour.conditions.normalize(),
            None => self.day.normalize(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WaForecast {
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaForecastResponse {
    #[serde(default)]
    location: WaLocation,
    forecast: WaForecast,
}

fn daily_forecast(parsed: &WaForecastResponse, days: u8) -> Vec<ForecastDay> {
    parsed
        .forecast
        .forecastday
        .iter()
        .take(usize::from(days))
        .enumerate()
        .map(|(position, day)| ForecastDay {
            date: day.date,
            position,
            observation: day.representative(),
        })
        .collect()
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::WeatherApi
    }

    fn forecast_days(&self) -> RangeInclusive<u8> {
        1..=10
    }

    #[instrument(skip(self), fields(provider = "weatherapi"))]
    async fn fetch_current(
        &self,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> Result<SourceEnvelope<Observation>, ProviderError> {
        let query = [
            ("key", self.api_key.clone()),
            ("q", format!("{lat},{lon}")),
        ];
        let parsed: WaResponse = self.source.get_json("current.json", &query).await?;

        let observation = parsed.current.normalize().into_units(units);
        Ok(SourceEnvelope::new(ProviderId::WeatherApi, observation)
            .with_place(parsed.location.place()))
    }

    #[instrument(skip(self), fields(provider = "weatherapi"))]
    async fn fetch_forecast(
        &self,
        lat: f64,
        lon: f64,
        days: u8,
        units: Units,
    ) -> Result<SourceEnvelope<Vec<ForecastDay>>, ProviderError> {
        let days = self.clamp_days(days);
        let query = [
            ("key", self.api_key.clone()),
            ("q", format!("{lat},{lon}")),
            ("days", days.to_string()),
            ("aqi", "no".to_string()),
            ("alerts", "no".to_string()),
        ];
        let parsed: WaForecastResponse = self.source.get_json("forecast.json", &query).await?;

        if parsed.forecast.forecastday.is_empty() {
            return Err(self.source.malformed("No forecast data returned from WeatherAPI"));
        }

        let forecast = daily_forecast(&parsed, days)
            .into_iter()
            .map(|day| ForecastDay {
                observation: day.observation.into_units(units),
                ..day
            })
            .collect();

        Ok(SourceEnvelope::new(ProviderId::WeatherApi, forecast)
            .with_place(parsed.location.place()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_payload_keeps_kph_and_uses_text_for_both_categories() {
        let json = r#"{
            "location": {"name": "London", "region": "City of London, Greater London", "country": "United Kingdom"},
            "current": {
                "last_updated_epoch": 1705320000,
                "temp_c": 7.0, "feelslike_c": 4.6, "humidity": 87, "pressure_mb": 1019.0,
                "wind_kph": 13.0, "wind_degree": 240,
                "condition": {"text": "Partly cloudy", "icon": "//cdn.weatherapi.com/weather/64x64/day/116.png"},
                "cloud": 50, "uv": 2.0, "vis_km": 10.0, "is_day": 1
            }
        }"#;
        let parsed: WaResponse = serde_json::from_str(json).unwrap();
        let obs = parsed.current.normalize();

        assert_eq!(obs.wind_speed, Some(13.0));
        assert_eq!(obs.description.as_deref(), Some("Partly cloudy"));
        assert_eq!(obs.condition.as_deref(), Some("Partly cloudy"));
        assert_eq!(obs.rain_1h, Some(0.0));
        assert_eq!(obs.snow_1h, None);
        assert_eq!(obs.is_day, Some(true));

        let place = parsed.location.place().unwrap();
        assert_eq!(place.name, "London");
        assert_eq!(place.region.as_deref(), Some("City of London, Greater London"));
    }

    #[test]
    fn forecast_uses_noon_hour_or_day_summary() {
        let json = r#"{
            "location": {"name": "London", "country": "United Kingdom"},
            "forecast": {"forecastday": [
                {
                    "date": "2024-01-15",
                    "day": {"avgtemp_c": 5.0},
                    "hour": [
                        {"time": "2024-01-15 11:00", "temp_c": 6.0},
                        {"time": "2024-01-15 12:00", "temp_c": 7.0, "snow_cm": 0.2},
                        {"time": "2024-01-15 13:00", "temp_c": 8.0}
                    ]
                },
                {
                    "date": "2024-01-16",
                    "day": {"avgtemp_c": 3.0, "totalprecip_mm": 4.8, "condition": {"text": "Light rain"}}
                }
            ]}
        }"#;
        let parsed: WaForecastResponse = serde_json::from_str(json).unwrap();
        let days = daily_forecast(&parsed, 10);

        assert_eq!(days.len(), 2);
        assert_eq!(days[0].observation.temp, Some(7.0));
        assert_eq!(days[0].observation.snow_1h, Some(2.0));
        assert_eq!(days[1].position, 1);
        assert_eq!(days[1].observation.temp, Some(3.0));
        assert!((days[1].observation.rain_1h.unwrap() - 0.2).abs() < 1e-9);
        assert_eq!(days[1].observation.condition.as_deref(), Some("Light rain"));
    }
}
