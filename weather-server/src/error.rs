//! API error handling
//!
//! Every failure leaves the server as the same JSON shape:
//! `{status, error, code, timestamp, details?}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, warn};
use weather_core::{ErrorClass, WeatherError, model::ProviderFailure};

/// Whether per-provider failure details go out in error bodies.
static EXPOSE_ERROR_DETAILS: AtomicBool = AtomicBool::new(true);

/// Turn `details` in error responses on or off. Off in production.
pub fn set_expose_error_details(expose: bool) {
    EXPOSE_ERROR_DETAILS.store(expose, Ordering::SeqCst);
}

fn should_expose_details() -> bool {
    EXPOSE_ERROR_DETAILS.load(Ordering::SeqCst)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Weather(#[from] WeatherError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub error: String,
    pub code: &'static str,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::BadRequest => StatusCode::BAD_REQUEST,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorClass::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Weather(err) => status_for(err.class()),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Weather(err) => match err {
                WeatherError::MissingParameter(_) => "missing_parameter",
                WeatherError::InvalidParameter(_) => "invalid_parameter",
                WeatherError::LocationNotFound(_) => "location_not_found",
                WeatherError::NoProviderData { .. } => match err.class() {
                    ErrorClass::GatewayTimeout => "provider_timeout",
                    _ => "no_provider_data",
                },
                WeatherError::Geocoding { .. } => "geocoding_failed",
            },
        }
    }

    /// Client-facing message plus diagnostics when `expose` is set.
    fn message(&self, expose: bool) -> (String, Option<serde_json::Value>) {
        match self {
            Self::Weather(err @ WeatherError::NoProviderData { failures }) => {
                let message = match err.class() {
                    ErrorClass::GatewayTimeout => "Request to weather provider timed out",
                    _ => "Weather data services unavailable",
                };
                if !expose {
                    return (message.to_string(), None);
                }
                let failures: Vec<ProviderFailure> =
                    failures.iter().map(ProviderFailure::from).collect();
                let details = serde_json::json!({
                    "cause": err.to_string(),
                    "failures": failures,
                });
                (message.to_string(), Some(details))
            }
            other => (other.to_string(), None),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let (error, details) = self.message(should_expose_details());
        let body = ErrorResponse {
            status: status.as_u16(),
            error,
            code: self.code(),
            timestamp: Utc::now(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
