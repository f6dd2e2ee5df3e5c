use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use std::{ops::RangeInclusive, time::Duration};
use tracing::instrument;

use crate::{
    error::ProviderError,
    model::{ForecastDay, Observation, Place, SourceEnvelope, Units},
    provider::{DEFAULT_TIMEOUT, HttpSource, ProviderId, representative_per_day, unix_to_utc},
};

use super::WeatherProvider;

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// OpenWeatherMap: current conditions plus a 5-day forecast in 3-hour steps.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    source: HttpSource,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    pub fn with_base_url(api_key: String, base_url: &str, timeout: Duration) -> Self {
        Self {
            api_key,
            source: HttpSource::new(ProviderId::OpenWeather, base_url, timeout),
        }
    }

    fn query(&self, lat: f64, lon: f64) -> Vec<(&'static str, String)> {
        vec![
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
            ("appid", self.api_key.clone()),
            ("units", "metric".to_string()),
        ]
    }
}

#[derive(Debug, Default, Deserialize)]
struct OwMain {
    temp: Option<f64>,
    feels_like: Option<f64>,
    pressure: Option<f64>,
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    main: Option<String>,
    description: Option<String>,
    icon: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OwWind {
    speed: Option<f64>,
    deg: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OwClouds {
    all: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OwPrecip {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
    #[serde(rename = "3h")]
    three_hours: Option<f64>,
}

impl OwPrecip {
    /// Hourly rate; 3-hour accumulations are spread evenly.
    fn per_hour(&self) -> Option<f64> {
        self.one_hour.or(self.three_hours.map(|v| v / 3.0))
    }
}

#[derive(Debug, Default, Deserialize)]
struct OwSys {
    country: Option<String>,
    sunrise: Option<i64>,
    sunset: Option<i64>,
    pod: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: Option<String>,
    dt: i64,
    #[serde(default)]
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    #[serde(default)]
    wind: OwWind,
    #[serde(default)]
    clouds: OwClouds,
    visibility: Option<f64>,
    #[serde(default)]
    rain: OwPrecip,
    #[serde(default)]
    snow: OwPrecip,
    #[serde(default)]
    sys: OwSys,
}

#[derive(Debug, Default, Deserialize)]
struct OwCity {
    name: Option<String>,
    country: Option<String>,
    /// Shift from UTC in seconds.
    timezone: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    dt: i64,
    #[serde(default)]
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    #[serde(default)]
    wind: OwWind,
    #[serde(default)]
    clouds: OwClouds,
    visibility: Option<f64>,
    #[serde(default)]
    rain: OwPrecip,
    #[serde(default)]
    snow: OwPrecip,
    #[serde(default)]
    sys: OwSys,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    #[serde(default)]
    city: OwCity,
    list: Vec<OwForecastEntry>,
}

struct Sample<'a> {
    main: &'a OwMain,
    weather: Option<&'a OwWeather>,
    wind: &'a OwWind,
    clouds: &'a OwClouds,
    visibility_m: Option<f64>,
    rain: &'a OwPrecip,
    snow: &'a OwPrecip,
    is_day: Option<bool>,
}

fn normalize(s: Sample<'_>) -> Observation {
    Observation {
        temp: s.main.temp,
        feels_like: s.main.feels_like,
        humidity: s.main.humidity,
        pressure: s.main.pressure,
        wind_speed: s.wind.speed.map(|mps| mps * 3.6),
        wind_direction: s.wind.deg,
        description: s.weather.and_then(|w| w.description.clone()),
        condition: s.weather.and_then(|w| w.main.clone()),
        icon: s.weather.and_then(|w| w.icon.clone()),
        clouds: s.clouds.all,
        uv_index: None,
        visibility: s.visibility_m.map(|m| m / 1000.0),
        rain_1h: Some(s.rain.per_hour().unwrap_or(0.0)),
        snow_1h: Some(s.snow.per_hour().unwrap_or(0.0)),
        aqi: None,
        is_day: s.is_day,
    }
}

fn current_observation(parsed: &OwCurrentResponse) -> Observation {
    let is_day = match (parsed.sys.sunrise, parsed.sys.sunset) {
        (Some(rise), Some(set)) => Some(rise <= parsed.dt && parsed.dt < set),
        _ => None,
    };

    normalize(Sample {
        main: &parsed.main,
        weather: parsed.weather.first(),
        wind: &parsed.wind,
        clouds: &parsed.clouds,
        visibility_m: parsed.visibility,
        rain: &parsed.rain,
        snow: &parsed.snow,
        is_day,
    })
}

fn daily_forecast(parsed: &OwForecastResponse, days: u8) -> Vec<ForecastDay> {
    let offset = ChronoDuration::seconds(parsed.city.timezone.unwrap_or(0));

    let samples = parsed.list.iter().filter_map(|entry| {
        unix_to_utc(entry.dt).map(|utc| ((utc + offset).naive_utc(), entry))
    });

    representative_per_day(samples)
        .into_iter()
        .take(usize::from(days))
        .enumerate()
        .map(|(position, (date, entry))| ForecastDay {
            date,
            position,
            observation: normalize(Sample {
                main: &entry.main,
                weather: entry.weather.first(),
                wind: &entry.wind,
                clouds: &entry.clouds,
                visibility_m: entry.visibility,
                rain: &entry.rain,
                snow: &entry.snow,
                is_day: entry.sys.pod.as_deref().map(|pod| pod == "d"),
            }),
        })
        .collect()
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenWeather
    }

    fn forecast_days(&self) -> RangeInclusive<u8> {
        1..=5
    }

    #[instrument(skip(self), fields(provider = "openweather"))]
    async fn fetch_current(
        &self,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> Result<SourceEnvelope<Observation>, ProviderError> {
        let parsed: OwCurrentResponse =
            self.source.get_json("weather", &self.query(lat, lon)).await?;

        let place = parsed.name.clone().map(|name| Place {
            name,
            country: parsed.sys.country.clone(),
            ..Place::default()
        });

        let observation = current_observation(&parsed).into_units(units);
        Ok(SourceEnvelope::new(ProviderId::OpenWeather, observation).with_place(place))
    }

    #[instrument(skip(self), fields(provider = "openweather"))]
    async fn fetch_forecast(
        &self,
        lat: f64,
        lon: f64,
        days: u8,
        units: Units,
    ) -> Result<SourceEnvelope<Vec<ForecastDay>>, ProviderError> {
        let days = self.clamp_days(days);
        let parsed: OwForecastResponse =
            self.source.get_json("forecast", &self.query(lat, lon)).await?;

        if parsed.list.is_empty() {
            return Err(self.source.malformed("forecast response contained no data"));
        }

        let forecast = daily_forecast(&parsed, days)
            .into_iter()
            .map(|day| ForecastDay {
                observation: day.observation.into_units(units),
                ..day
            })
            .collect();

        let place = parsed.city.name.clone().map(|name| Place {
            name,
            country: parsed.city.country.clone(),
            ..Place::default()
        });

        Ok(SourceEnvelope::new(ProviderId::OpenWeather, forecast).with_place(place))
    }
}
