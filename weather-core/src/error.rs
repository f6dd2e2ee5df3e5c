use std::time::Duration;

use thiserror::Error;

use crate::provider::ProviderId;

/// Failure of a single provider call.
///
/// These never reach the caller on their own: the engine drops the provider
/// from the merge set and keeps going. They only surface, collected, inside
/// [`WeatherError::NoProviderData`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("{provider} request timed out after {}s", .timeout.as_secs_f64())]
    Timeout { provider: ProviderId, timeout: Duration },

    #[error("{provider} is unreachable: {message}")]
    Connect { provider: ProviderId, message: String },

    #[error("{provider} request failed with status {status}: {message}")]
    Status {
        provider: ProviderId,
        status: u16,
        message: String,
    },

    #[error("{provider} returned a malformed payload: {message}")]
    Malformed { provider: ProviderId, message: String },

    #[error("No API key configured for provider '{provider}'")]
    NotConfigured { provider: ProviderId },

    #[error("{provider} task failed: {message}")]
    Internal { provider: ProviderId, message: String },
}

impl ProviderError {
    pub fn provider(&self) -> ProviderId {
        match self {
            Self::Timeout { provider, .. }
            | Self::Connect { provider, .. }
            | Self::Status { provider, .. }
            | Self::Malformed { provider, .. }
            | Self::NotConfigured { provider }
            | Self::Internal { provider, .. } => *provider,
        }
    }

    /// Upstream HTTP status, when the provider answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }

    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured { .. })
    }

    /// Classify a transport error from `reqwest`.
    pub(crate) fn from_transport(
        provider: ProviderId,
        timeout: Duration,
        err: reqwest::Error,
    ) -> Self {
        if err.is_timeout() {
            Self::Timeout { provider, timeout }
        } else if err.is_connect() {
            Self::Connect {
                provider,
                message: err.to_string(),
            }
        } else if err.is_decode() || err.is_body() {
            Self::Malformed {
                provider,
                message: err.to_string(),
            }
        } else {
            Self::Internal {
                provider,
                message: err.to_string(),
            }
        }
    }
}

/// Errors surfaced to whoever drives the aggregation (HTTP layer, CLI).
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Missing required parameters: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No locations found for {0}")]
    LocationNotFound(String),

    #[error("No weather data available from any provider")]
    NoProviderData { failures: Vec<ProviderError> },

    #[error("Geocoding failed: {message}")]
    Geocoding { message: String, timed_out: bool },
}

/// Coarse outcome class the boundary maps onto a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    BadRequest,
    NotFound,
    Unavailable,
    GatewayTimeout,
}

impl WeatherError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingParameter(_) | Self::InvalidParameter(_) => ErrorClass::BadRequest,
            Self::LocationNotFound(_) => ErrorClass::NotFound,
            Self::NoProviderData { failures } => {
                // Unconfigured providers were never called.
                let mut dispatched = failures
                    .iter()
                    .filter(|f| !f.is_not_configured())
                    .peekable();
                if dispatched.peek().is_some() && dispatched.all(ProviderError::is_timeout) {
                    ErrorClass::GatewayTimeout
                } else {
                    ErrorClass::Unavailable
                }
            }
            Self::Geocoding { timed_out: true, .. } => ErrorClass::GatewayTimeout,
            Self::Geocoding { .. } => ErrorClass::Unavailable,
        }
    }
}
