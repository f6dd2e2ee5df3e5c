//! Human-friendly rendering of aggregation results.

use std::fmt::Write;

use chrono::{DateTime, Local, Utc};
use weather_core::{AggregationResult, Location, Observation, Units, model::ProviderFailure};

struct Labels {
    temp: &'static str,
    speed: &'static str,
    distance: &'static str,
    precip: &'static str,
}

fn labels(units: Units) -> Labels {
    match units {
        Units::Metric => Labels {
            temp: "°C",
            speed: "km/h",
            distance: "km",
            precip: "mm",
        },
        Units::Imperial => Labels {
            temp: "°F",
            speed: "mph",
            distance: "mi",
            precip: "in",
        },
    }
}

pub fn render(result: &AggregationResult, units: Units) -> String {
    let mut out = String::new();
    let l = labels(units);

    let _ = writeln!(out, "{}", heading(result.location()));

    match result {
        AggregationResult::Current(current) => {
            let providers: Vec<&str> = current.sources.iter().map(|s| s.provider.as_str()).collect();
            let _ = writeln!(out, "Sources: {}", providers.join(", "));
            let _ = writeln!(out, "Updated: {}", local_time(current.timestamp));
            let _ = writeln!(out);
            observation_block(&mut out, &current.aggregated, &l);
            failures_block(&mut out, &current.failures);
        }
        AggregationResult::Forecast(forecast) => {
            let providers: Vec<&str> =
                forecast.sources.iter().map(|s| s.provider.as_str()).collect();
            let _ = writeln!(out, "Sources: {}", providers.join(", "));
            let _ = writeln!(out, "Updated: {}", local_time(forecast.timestamp));
            let _ = writeln!(out);
            for day in &forecast.daily {
                let obs = &day.aggregated;
                let _ = writeln!(
                    out,
                    "{}  {:>8}  {:<24} {} source{}",
                    day.date.format("%a %Y-%m-%d"),
                    value(obs.temp, l.temp),
                    obs.description.as_deref().unwrap_or("-"),
                    day.sources.len(),
                    if day.sources.len() == 1 { "" } else { "s" },
                );
            }
            failures_block(&mut out, &forecast.failures);
        }
    }

    out
}

fn heading(location: &Location) -> String {
    let coords = format!("({:.2}, {:.2})", location.lat, location.lon);
    let mut parts: Vec<&str> = Vec::new();
    if let Some(name) = &location.name {
        parts.push(name);
    }
    if let Some(state) = location.state.as_ref().or(location.region.as_ref()) {
        parts.push(state);
    }
    if let Some(country) = &location.country {
        parts.push(country);
    }
    if let Some(zip) = &location.zip {
        parts.push(zip);
    }

    if parts.is_empty() {
        coords
    } else {
        format!("{} {coords}", parts.join(", "))
    }
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn value(v: Option<f64>, unit: &str) -> String {
    match v {
        Some(v) => format!("{v:.1} {unit}"),
        None => "-".to_string(),
    }
}

fn observation_block(out: &mut String, obs: &Observation, l: &Labels) {
    let mut line = |label: &str, text: String| {
        let _ = writeln!(out, "  {label:<12} {text}");
    };

    if let Some(description) = &obs.description {
        line("Conditions:", description.clone());
    }
    line(
        "Temperature:",
        match obs.feels_like {
            Some(_) => format!(
                "{} (feels like {})",
                value(obs.temp, l.temp),
                value(obs.feels_like, l.temp)
            ),
            None => value(obs.temp, l.temp),
        },
    );
    if obs.humidity.is_some() {
        line("Humidity:", value(obs.humidity, "%"));
    }
    if let Some(speed) = obs.wind_speed {
        let direction = obs
            .wind_direction
            .map(|d| format!(" from {d:.0}°"))
            .unwrap_or_default();
        line("Wind:", format!("{speed:.1} {}{direction}", l.speed));
    }
    if obs.pressure.is_some() {
        line("Pressure:", value(obs.pressure, "hPa"));
    }
    if obs.visibility.is_some() {
        line("Visibility:", value(obs.visibility, l.distance));
    }
    if obs.rain_1h.is_some() {
        line("Rain (1h):", value(obs.rain_1h, l.precip));
    }
    if obs.aqi.is_some() {
        line("Air quality:", value(obs.aqi, "AQI"));
    }
}

fn failures_block(out: &mut String, failures: &[ProviderFailure]) {
    if failures.is_empty() {
        return;
    }
    let _ = writeln!(out);
    for failure in failures {
        let _ = writeln!(out, "! {}: {}", failure.provider, failure.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weather_core::{CurrentAggregate, ProviderId, model::SourceEnvelope};

    fn current() -> AggregationResult {
        let aggregated = Observation {
            temp: Some(21.437),
            feels_like: Some(20.0),
            description: Some("light rain".into()),
            wind_speed: Some(18.0),
            wind_direction: Some(230.0),
            ..Observation::default()
        };
        AggregationResult::Current(CurrentAggregate {
            location: Location {
                name: Some("Berlin".into()),
                country: Some("DE".into()),
                ..Location::at(52.52, 13.405)
            },
            timestamp: Utc::now(),
            sources: vec![SourceEnvelope::new(ProviderId::OpenWeather, aggregated.clone())],
            aggregated,
            failures: vec![ProviderFailure {
                provider: ProviderId::WeatherBit,
                status: Some(403),
                message: "forbidden".into(),
            }],
        })
    }

    #[test]
    fn current_rendering_shows_key_fields() {
        let text = render(&current(), Units::Metric);

        assert!(text.starts_with("Berlin, DE (52.52, 13.40)"));
        assert!(text.contains("Sources: openweather"));
        assert!(text.contains("Updated: "));
        assert!(text.contains("21.4 °C (feels like 20.0 °C)"));
        assert!(text.contains("18.0 km/h from 230°"));
        assert!(text.contains("! weatherbit: forbidden"));
        assert!(!text.contains("Humidity"));
    }

    #[test]
    fn imperial_labels() {
        let text = render(&current(), Units::Imperial);
        assert!(text.contains("°F"));
        assert!(text.contains("mph"));
    }

    #[test]
    fn heading_without_name_is_just_coordinates() {
        assert_eq!(heading(&Location::at(1.0, -2.5)), "(1.00, -2.50)");
    }
}
