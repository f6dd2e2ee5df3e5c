//! HTTP API for the weather aggregator.
//!
//! Thin axum layer over [`weather_core::WeatherService`]: query parsing,
//! cache-key derivation and the JSON error contract live here.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::{ApiError, set_expose_error_details};
pub use routes::create_router;
pub use state::AppState;
