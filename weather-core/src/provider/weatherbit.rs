use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::{ops::RangeInclusive, time::Duration};
use tracing::instrument;

use crate::{
    error::ProviderError,
    model::{ForecastDay, Observation, Place, SourceEnvelope, Units},
    provider::{DEFAULT_TIMEOUT, HttpSource, ProviderId},
};

use super::WeatherProvider;

pub const DEFAULT_BASE_URL: &str = "https://api.weatherbit.io/v2.0";

/// Weatherbit: current conditions and a daily forecast of up to 16 days.
#[derive(Debug, Clone)]
pub struct WeatherBitProvider {
    api_key: String,
    source: HttpSource,
}

impl WeatherBitProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    pub fn with_base_url(api_key: String, base_url: &str, timeout: Duration) -> Self {
        Self {
            api_key,
            source: HttpSource::new(ProviderId::WeatherBit, base_url, timeout),
        }
    }

    fn query(&self, lat: f64, lon: f64) -> Vec<(&'static str, String)> {
        vec![
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
            ("key", self.api_key.clone()),
            ("units", "M".to_string()),
        ]
    }
}

#[derive(Debug, Default, Deserialize)]
struct WbWeather {
    description: Option<String>,
    icon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WbCurrent {
    temp: Option<f64>,
    app_temp: Option<f64>,
    rh: Option<f64>,
    pres: Option<f64>,
    /// m/s
    wind_spd: Option<f64>,
    wind_dir: Option<f64>,
    #[serde(default)]
    weather: WbWeather,
    clouds: Option<f64>,
    uv: Option<f64>,
    vis: Option<f64>,
    /// mm/hr
    precip: Option<f64>,
    snow: Option<f64>,
    aqi: Option<f64>,
    pod: Option<String>,
    city_name: Option<String>,
    country_code: Option<String>,
    state_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WbCurrentResponse {
    #[serde(default)]
    data: Vec<WbCurrent>,
}

impl WbCurrent {
    fn normalize(&self) -> Observation {
        Observation {
            temp: self.temp,
            feels_like: self.app_temp,
            humidity: self.rh,
            pressure: self.pres,
            wind_speed: self.wind_spd.map(|mps| mps * 3.6),
            wind_direction: self.wind_dir,
            description: self.weather.description.clone(),
            condition: self.weather.description.clone(),
            icon: self.weather.icon.clone(),
            clouds: self.clouds,
            uv_index: self.uv,
            visibility: self.vis,
            rain_1h: Some(self.precip.unwrap_or(0.0)),
            snow_1h: Some(self.snow.unwrap_or(0.0)),
            aqi: self.aqi,
            is_day: self.pod.as_deref().map(|pod| pod == "d"),
        }
    }

    fn place(&self) -> Option<Place> {
        self.city_name.clone().map(|name| Place {
            name,
            country: self.country_code.clone(),
            state: self.state_code.clone(),
            ..Place::default()
        })
    }
}

#[derive(Debug, Deserialize)]
struct WbDaily {
    valid_date: NaiveDate,
    temp: Option<f64>,
    app_max_temp: Option<f64>,
    app_min_temp: Option<f64>,
    rh: Option<f64>,
    pres: Option<f64>,
    wind_spd: Option<f64>,
    wind_dir: Option<f64>,
    #[serde(default)]
    weather: WbWeather,
    clouds: Option<f64>,
    uv: Option<f64>,
    vis: Option<f64>,
    /// mm accumulated over the day
    precip: Option<f64>,
    snow: Option<f64>,
}

impl WbDaily {
    fn normalize(&self) -> Observation {
        let feels_like = match (self.app_max_temp, self.app_min_temp) {
            (Some(max), Some(min)) => Some((max + min) / 2.0),
            (max, min) => max.or(min),
        };

        Observation {
            temp: self.temp,
            feels_like,
            humidity: self.rh,
            pressure: self.pres,
            wind_speed: self.wind_spd.map(|mps| mps * 3.6),
            wind_direction: self.wind_dir,
            description: self.weather.description.clone(),
            condition: self.weather.description.clone(),
            icon: self.weather.icon.clone(),
            clouds: self.clouds,
            uv_index: self.uv,
            visibility: self.vis,
            rain_1h: Some(self.precip.unwrap_or(0.0) / 24.0),
            snow_1h: Some(self.snow.unwrap_or(0.0) / 24.0),
            aqi: None,
            is_day: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WbForecastResponse {
    #[serde(default)]
    data: Vec<WbDaily>,
    city_name: Option<String>,
    country_code: Option<String>,
    state_code: Option<String>,
}

fn daily_forecast(parsed: &WbForecastResponse, days: u8) -> Vec<ForecastDay> {
    parsed
        .data
        .iter()
        .take(usize::from(days))
        .enumerate()
        .map(|(position, day)| ForecastDay {
            date: day.valid_date,
            position,
            observation: day.normalize(),
        })
        .collect()
}

#[async_trait]
impl WeatherProvider for WeatherBitProvider {
    fn id(&self) -> ProviderId {
        ProviderId::WeatherBit
    }

    fn forecast_days(&self) -> RangeInclusive<u8> {
        1..=16
    }

    #[instrument(skip(self), fields(provider = "weatherbit"))]
    async fn fetch_current(
        &self,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> Result<SourceEnvelope<Observation>, ProviderError> {
        let parsed: WbCurrentResponse =
            self.source.get_json("current", &self.query(lat, lon)).await?;

        let current = parsed
            .data
            .first()
            .ok_or_else(|| self.source.malformed("No weather data returned from Weatherbit"))?;

        let observation = current.normalize().into_units(units);
        Ok(SourceEnvelope::new(ProviderId::WeatherBit, observation).with_place(current.place()))
    }

    #[instrument(skip(self), fields(provider = "weatherbit"))]
    async fn fetch_forecast(
        &self,
        lat: f64,
        lon: f64,
        days: u8,
        units: Units,
    ) -> Result<SourceEnvelope<Vec<ForecastDay>>, ProviderError> {
        let days = self.clamp_days(days);
        let mut query = self.query(lat, lon);
        query.push(("days", days.to_string()));

        let parsed: WbForecastResponse = self.source.get_json("forecast/daily", &query).await?;

        if parsed.data.is_empty() {
            return Err(self.source.malformed("No forecast data returned from Weatherbit"));
        }

        let forecast = daily_forecast(&parsed, days)
            .into_iter()
            .map(|day| ForecastDay {
                observation: day.observation.into_units(units),
                ..day
            })
            .collect();

        let place = parsed.city_name.clone().map(|name| Place {
            name,
            country: parsed.country_code.clone(),
            state: parsed.state_code.clone(),
            ..Place::default()
        });

        Ok(SourceEnvelope::new(ProviderId::WeatherBit, forecast).with_place(place))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_payload_converts_wind_and_keeps_aqi() {
        let json = r#"{"count": 1, "data": [{
            "temp": 24.2, "app_temp": 25.1, "rh": 60, "pres": 1011.5,
            "wind_spd": 2.5, "wind_dir": 180,
            "weather": {"icon": "c03d", "code": 803, "description": "Broken clouds"},
            "clouds": 70, "uv": 5.5, "vis": 16, "precip": 0, "snow": 0, "aqi": 42,
            "pod": "d", "city_name": "Raleigh", "country_code": "US", "state_code": "NC"
        }]}"#;
        let parsed: WbCurrentResponse = serde_json::from_str(json).unwrap();
        let current = parsed.data.first().unwrap();
        let obs = current.normalize();

        assert_eq!(obs.wind_speed, Some(9.0));
        assert_eq!(obs.aqi, Some(42.0));
        assert_eq!(obs.condition.as_deref(), Some("Broken clouds"));
        assert_eq!(obs.is_day, Some(true));

        let place = current.place().unwrap();
        assert_eq!(place.state.as_deref(), Some("NC"));
    }

    #[test]
    fn daily_forecast_averages_apparent_temperature() {
        let json = r#"{
            "city_name": "Raleigh", "country_code": "US", "state_code": "NC",
            "data": [
                {"valid_date": "2024-01-15", "temp": 10.0, "app_max_temp": 12.0, "app_min_temp": 4.0, "precip": 12.0},
                {"valid_date": "2024-01-16", "temp": 11.0, "app_max_temp": 13.0},
                {"valid_date": "2024-01-17", "temp": 12.0}
            ]
        }"#;
        let parsed: WbForecastResponse = serde_json::from_str(json).unwrap();
        let days = daily_forecast(&parsed, 2);

        assert_eq!(days.len(), 2);
        assert_eq!(days[0].observation.feels_like, Some(8.0));
        assert_eq!(days[0].observation.rain_1h, Some(0.5));
        assert_eq!(days[1].observation.feels_like, Some(13.0));
        assert_eq!(days[1].date, NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
    }
}
