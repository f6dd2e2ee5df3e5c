//! Request handlers for the weather API.

use axum::{
    Json,
    extract::{OriginalUri, Path, Query, State},
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use weather_core::{
    AggregateOptions, CacheStats, DEFAULT_FORECAST_DAYS, Mode, Served, Target, Units,
    WeatherError, WeatherQuery, cache_key, geocode::DEFAULT_ZIP_COUNTRY,
};

use crate::{error::ApiError, state::AppState};

pub const DATA_SOURCE_HEADER: HeaderName = HeaderName::from_static("x-data-source");

/// Query string of the coordinate endpoints. Everything arrives as text so
/// that missing and unparsable values can be told apart.
#[derive(Debug, Default, Deserialize)]
pub struct CoordinateParams {
    lat: Option<String>,
    lon: Option<String>,
    days: Option<String>,
    units: Option<String>,
    providers: Option<String>,
}

/// Query string of the city and zip endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct LookupParams {
    country: Option<String>,
    days: Option<String>,
    forecast: Option<String>,
    units: Option<String>,
    providers: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClearParams {
    key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub message: String,
    pub timestamp: chrono::DateTime<Utc>,
}

fn options(
    units: Option<&str>,
    providers: Option<&str>,
) -> Result<AggregateOptions, WeatherError> {
    let units = match units.filter(|u| !u.is_empty()) {
        Some(u) => {
            Units::try_from(u).map_err(|e| WeatherError::InvalidParameter(e.to_string()))?
        }
        None => Units::default(),
    };

    Ok(AggregateOptions {
        units,
        providers: providers
            .filter(|p| !p.is_empty())
            .map(AggregateOptions::parse_providers),
    })
}

fn parse_coordinate(name: &str, raw: &str) -> Result<f64, WeatherError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            WeatherError::InvalidParameter(format!("{name} must be a number, got '{raw}'"))
        })
}

fn parse_days(raw: Option<&str>) -> Result<u8, WeatherError> {
    match raw.filter(|d| !d.is_empty()) {
        None => Ok(DEFAULT_FORECAST_DAYS),
        // Anything past the longest forecast gets clamped by the engine.
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map(|d| d.min(u32::from(u8::MAX)) as u8)
            .map_err(|_| {
                WeatherError::InvalidParameter(format!(
                    "days must be a whole number, got '{raw}'"
                ))
            }),
    }
}

fn coordinates(params: &CoordinateParams) -> Result<Target, WeatherError> {
    let (lat, lon) = match (params.lat.as_deref(), params.lon.as_deref()) {
        (Some(lat), Some(lon)) if !lat.is_empty() && !lon.is_empty() => (lat, lon),
        _ => return Err(WeatherError::MissingParameter("lat and lon".into())),
    };

    Ok(Target::Coordinates {
        lat: parse_coordinate("lat", lat)?,
        lon: parse_coordinate("lon", lon)?,
    })
}

/// `forecast=true` or any `days` switches a lookup to forecast mode.
fn lookup_mode(params: &LookupParams) -> Result<Mode, WeatherError> {
    let wants_forecast = params.forecast.as_deref() == Some("true");
    match params.days.as_deref().filter(|d| !d.is_empty()) {
        Some(days) => Ok(Mode::Forecast {
            days: parse_days(Some(days))?,
        }),
        None if wants_forecast => Ok(Mode::Forecast {
            days: DEFAULT_FORECAST_DAYS,
        }),
        None => Ok(Mode::Current),
    }
}

async fn serve(
    state: &AppState,
    uri: &OriginalUri,
    query: WeatherQuery,
) -> Result<Response, ApiError> {
    let key = cache_key(uri.0.path(), uri.0.query());
    let Served { result, from_cache } = state.service.fetch(&key, &query).await?;

    let source = if from_cache { "cache" } else { "providers" };
    Ok((
        [(DATA_SOURCE_HEADER, HeaderValue::from_static(source))],
        Json(result.as_ref()),
    )
        .into_response())
}

/// `GET /api/weather/current?lat&lon[&units][&providers]`
pub async fn current(
    State(state): State<AppState>,
    uri: OriginalUri,
    Query(params): Query<CoordinateParams>,
) -> Result<Response, ApiError> {
    let query = WeatherQuery {
        target: coordinates(&params)?,
        mode: Mode::Current,
        options: options(params.units.as_deref(), params.providers.as_deref())?,
    };
    serve(&state, &uri, query).await
}

/// `GET /api/weather/forecast?lat&lon[&days][&units][&providers]`
pub async fn forecast(
    State(state): State<AppState>,
    uri: OriginalUri,
    Query(params): Query<CoordinateParams>,
) -> Result<Response, ApiError> {
    let query = WeatherQuery {
        target: coordinates(&params)?,
        mode: Mode::Forecast {
            days: parse_days(params.days.as_deref())?,
        },
        options: options(params.units.as_deref(), params.providers.as_deref())?,
    };
    serve(&state, &uri, query).await
}

/// `GET /api/weather/city/{city_name}`
pub async fn by_city(
    State(state): State<AppState>,
    uri: OriginalUri,
    Path(city_name): Path<String>,
    Query(params): Query<LookupParams>,
) -> Result<Response, ApiError> {
    if city_name.trim().is_empty() {
        return Err(WeatherError::MissingParameter("city name".into()).into());
    }

    let query = WeatherQuery {
        target: Target::City {
            name: city_name,
            country: params.country.clone().filter(|c| !c.is_empty()),
        },
        mode: lookup_mode(&params)?,
        options: options(params.units.as_deref(), params.providers.as_deref())?,
    };
    serve(&state, &uri, query).await
}

/// `GET /api/weather/zip/{zip_code}`
pub async fn by_zip(
    State(state): State<AppState>,
    uri: OriginalUri,
    Path(zip_code): Path<String>,
    Query(params): Query<LookupParams>,
) -> Result<Response, ApiError> {
    if zip_code.trim().is_empty() {
        return Err(WeatherError::MissingParameter("zip code".into()).into());
    }

    let query = WeatherQuery {
        target: Target::Zip {
            code: zip_code,
            country: params
                .country
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_ZIP_COUNTRY.to_string()),
        },
        mode: lookup_mode(&params)?,
        options: options(params.units.as_deref(), params.providers.as_deref())?,
    };
    serve(&state, &uri, query).await
}

/// `GET /api/weather/cache/stats`
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache().stats().await)
}

/// `DELETE /api/weather/cache[?key=]`
pub async fn clear_cache(
    State(state): State<AppState>,
    Query(params): Query<ClearParams>,
) -> Json<ClearResponse> {
    let key = params.key.filter(|k| !k.is_empty());
    state.cache().invalidate(key.as_deref()).await;

    Json(ClearResponse {
        message: match key {
            Some(key) => format!("Cache for {key} invalidated"),
            None => "All cache invalidated".to_string(),
        },
        timestamp: Utc::now(),
    })
}

/// `GET /`
pub async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "Weather Aggregator API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "current": "/api/weather/current?lat={latitude}&lon={longitude}",
            "forecast": "/api/weather/forecast?lat={latitude}&lon={longitude}&days={days}",
            "byCity": "/api/weather/city/{cityName}",
            "byZipCode": "/api/weather/zip/{zipCode}?country={countryCode}",
            "cacheStats": "/api/weather/cache/stats",
            "clearCache": "DELETE /api/weather/cache?key={key}"
        }
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound("The requested resource does not exist".to_string())
}
