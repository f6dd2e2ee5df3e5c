use std::{convert::TryFrom, fmt};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::ProviderError, provider::ProviderId};

/// Unit system requested by the caller.
///
/// Adapters always fetch metric data and convert their own output, so every
/// observation taking part in one merge shares the same system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Units {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            _ => Err(anyhow::anyhow!(
                "Unknown units '{value}'. Supported units: metric, imperial."
            )),
        }
    }
}

/// Canonical current-conditions record.
///
/// Every numeric field is `None` when the provider did not report it. Metric
/// units: °C, km/h, hPa, %, km, mm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub description: Option<String>,
    pub condition: Option<String>,
    pub icon: Option<String>,
    pub clouds: Option<f64>,
    pub uv_index: Option<f64>,
    pub visibility: Option<f64>,
    pub rain_1h: Option<f64>,
    pub snow_1h: Option<f64>,
    pub aqi: Option<f64>,
    pub is_day: Option<bool>,
}

impl Observation {
    /// Convert a metric observation into `units`. Metric is a no-op.
    pub fn into_units(self, units: Units) -> Self {
        match units {
            Units::Metric => self,
            Units::Imperial => {
                let c_to_f = |c: f64| c * 9.0 / 5.0 + 32.0;
                let km_to_mi = |v: f64| v / 1.609_344;
                let mm_to_in = |v: f64| v / 25.4;
                Self {
                    temp: self.temp.map(c_to_f),
                    feels_like: self.feels_like.map(c_to_f),
                    wind_speed: self.wind_speed.map(km_to_mi),
                    visibility: self.visibility.map(km_to_mi),
                    rain_1h: self.rain_1h.map(mm_to_in),
                    snow_1h: self.snow_1h.map(mm_to_in),
                    ..self
                }
            }
        }
    }
}

/// One calendar day of a provider's forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: NaiveDate,
    /// 0-based position in the provider's sequence.
    pub position: usize,
    #[serde(flatten)]
    pub observation: Observation,
}

/// Place descriptor reported by a provider or a geocoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// A provider's canonical output, tagged with the provider that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEnvelope<T> {
    pub provider: ProviderId,
    #[serde(skip)]
    pub place: Option<Place>,
    pub data: T,
}

impl<T> SourceEnvelope<T> {
    pub fn new(provider: ProviderId, data: T) -> Self {
        Self {
            provider,
            place: None,
            data,
        }
    }

    pub fn with_place(mut self, place: Option<Place>) -> Self {
        self.place = place.filter(|p| !p.name.is_empty());
        self
    }
}

/// Where an aggregation was computed for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
}

impl Location {
    pub fn at(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            ..Self::default()
        }
    }

    /// Copy the descriptive fields of `place` over this location.
    pub fn adopt(&mut self, place: &Place) {
        self.name = Some(place.name.clone());
        self.country = place.country.clone();
        self.region = place.region.clone();
        self.state = place.state.clone();
    }
}

/// Diagnostic record of a provider that was excluded from the merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
}

impl From<&ProviderError> for ProviderFailure {
    fn from(err: &ProviderError) -> Self {
        Self {
            provider: err.provider(),
            status: err.status(),
            message: err.to_string(),
        }
    }
}

/// Merged current conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentAggregate {
    pub location: Location,
    pub timestamp: DateTime<Utc>,
    pub sources: Vec<SourceEnvelope<Observation>>,
    pub aggregated: Observation,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ProviderFailure>,
}

/// One provider's contribution to a merged forecast day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayContribution {
    pub provider: ProviderId,
    pub forecast: ForecastDay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub sources: Vec<DayContribution>,
    pub aggregated: Observation,
}

/// Merged multi-day forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastAggregate {
    pub location: Location,
    pub timestamp: DateTime<Utc>,
    pub sources: Vec<SourceEnvelope<Vec<ForecastDay>>>,
    pub daily: Vec<DailyAggregate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ProviderFailure>,
}

/// What the response cache stores and the boundary serialises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregationResult {
    Current(CurrentAggregate),
    Forecast(ForecastAggregate),
}

impl AggregationResult {
    pub fn location(&self) -> &Location {
        match self {
            Self::Current(c) => &c.location,
            Self::Forecast(f) => &f.location,
        }
    }

    pub fn location_mut(&mut self) -> &mut Location {
        match self {
            Self::Current(c) => &mut c.location,
            Self::Forecast(f) => &mut f.location,
        }
    }
}
