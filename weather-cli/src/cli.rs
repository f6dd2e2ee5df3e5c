use anyhow::{Context, anyhow};
use clap::{Args, Parser, Subcommand};
use inquire::Password;
use tracing::debug;
use weather_core::{
    AggregateOptions, Config, DEFAULT_FORECAST_DAYS, Mode, ProviderId, Target, Units,
    WeatherError, WeatherQuery, WeatherService, geocode::DEFAULT_ZIP_COUNTRY,
};

use crate::output;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "weather",
    version,
    about = "Merged weather from several providers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Flags shared by every lookup.
#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Unit system: "metric" or "imperial".
    #[arg(long, default_value = "metric")]
    units: String,

    /// Comma separated provider allowlist, e.g. "openweather,weatherbit".
    #[arg(long)]
    providers: Option<String>,

    /// Print the raw aggregation result as JSON.
    #[arg(long)]
    json: bool,
}

impl QueryArgs {
    fn options(&self) -> anyhow::Result<AggregateOptions> {
        Ok(AggregateOptions {
            units: Units::try_from(self.units.as_str())?,
            providers: self
                .providers
                .as_deref()
                .map(AggregateOptions::parse_providers),
        })
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name: "openweather", "weatherapi" or "weatherbit".
        provider: String,
    },

    /// List providers and whether they have credentials.
    Providers,

    /// Current conditions at a coordinate.
    Current {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Daily forecast at a coordinate.
    Forecast {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        /// Number of days, 1 to 16.
        #[arg(long, default_value_t = DEFAULT_FORECAST_DAYS)]
        days: u8,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Weather for a city name.
    City {
        name: String,
        /// Two-letter country code.
        #[arg(long)]
        country: Option<String>,
        /// Show the forecast instead of current conditions.
        #[arg(long)]
        forecast: bool,
        /// Forecast length; implies --forecast.
        #[arg(long)]
        days: Option<u8>,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Weather for a postal code.
    Zip {
        code: String,
        #[arg(long, default_value = DEFAULT_ZIP_COUNTRY)]
        country: String,
        #[arg(long)]
        forecast: bool,
        #[arg(long)]
        days: Option<u8>,
        #[command(flatten)]
        query: QueryArgs,
    },
}

fn mode(forecast: bool, days: Option<u8>) -> Mode {
    match (forecast, days) {
        (_, Some(days)) => Mode::Forecast { days },
        (true, None) => Mode::Forecast {
            days: DEFAULT_FORECAST_DAYS,
        },
        (false, None) => Mode::Current,
    }
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let (target, mode, query) = match self.command {
            Command::Configure { provider } => return configure(&provider),
            Command::Providers => return list_providers(),
            Command::Current { lat, lon, query } => {
                (Target::Coordinates { lat, lon }, Mode::Current, query)
            }
            Command::Forecast {
                lat,
                lon,
                days,
                query,
            } => (Target::Coordinates { lat, lon }, Mode::Forecast { days }, query),
            Command::City {
                name,
                country,
                forecast,
                days,
                query,
            } => (Target::City { name, country }, mode(forecast, days), query),
            Command::Zip {
                code,
                country,
                forecast,
                days,
                query,
            } => (Target::Zip { code, country }, mode(forecast, days), query),
        };

        let options = query.options()?;
        let units = options.units;
        let request = WeatherQuery {
            target,
            mode,
            options,
        };

        let service = WeatherService::from_config(&load_config()?);
        if service.aggregator().registry().is_empty() {
            return Err(anyhow!(
                "No providers configured.\n\
                 Hint: run `weather configure <provider>` or set OPENWEATHER_API_KEY, \
                 WEATHERAPI_API_KEY or WEATHERBIT_API_KEY."
            ));
        }

        debug!(?request, "Resolving query");
        let result = service.resolve(&request).await.map_err(explain)?;

        if query.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print!("{}", output::render(&result, units));
        }

        Ok(())
    }
}

fn load_config() -> anyhow::Result<Config> {
    let mut config = Config::load()?;
    config.apply_env()?;
    Ok(config)
}

/// Attach per-provider reasons when nothing could be fetched.
fn explain(err: WeatherError) -> anyhow::Error {
    if let WeatherError::NoProviderData { failures } = &err
        && !failures.is_empty()
    {
        let reasons: Vec<String> = failures.iter().map(|f| format!("  - {f}")).collect();
        return anyhow!("{err}:\n{}", reasons.join("\n"));
    }
    err.into()
}

fn configure(provider: &str) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;

    let api_key = Password::new(&format!("API key for {id}:"))
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;

    let api_key = api_key.trim().to_string();
    if api_key.is_empty() {
        return Err(anyhow!("API key must not be empty"));
    }

    let mut config = Config::load()?;
    config.upsert_provider_api_key(id, api_key);
    config.save()?;

    println!(
        "Saved credentials for {id} to {}",
        Config::config_file_path()?.display()
    );
    Ok(())
}

fn list_providers() -> anyhow::Result<()> {
    let config = load_config()?;
    for id in ProviderId::all() {
        let status = if config.is_provider_configured(*id) {
            "configured"
        } else {
            "missing API key"
        };
        println!("{:<12} {status}", id.as_str());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn negative_coordinates_parse() {
        let cli = Cli::parse_from(["weather", "current", "--lat", "-33.87", "--lon", "151.21"]);
        match cli.command {
            Command::Current { lat, lon, query } => {
                assert_eq!(lat, -33.87);
                assert_eq!(lon, 151.21);
                assert_eq!(query.options().unwrap(), AggregateOptions::default());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn shared_flags_build_options() {
        let cli = Cli::parse_from([
            "weather",
            "forecast",
            "--lat",
            "1",
            "--lon",
            "2",
            "--units",
            "imperial",
            "--providers",
            "weatherbit, openweather",
        ]);
        let Command::Forecast { days, query, .. } = cli.command else {
            panic!("expected forecast");
        };

        assert_eq!(days, DEFAULT_FORECAST_DAYS);
        let options = query.options().unwrap();
        assert_eq!(options.units, Units::Imperial);
        assert_eq!(
            options.providers,
            Some(vec![ProviderId::WeatherBit, ProviderId::OpenWeather])
        );
    }

    #[test]
    fn days_imply_forecast_mode() {
        assert_eq!(mode(false, None), Mode::Current);
        assert_eq!(mode(true, None), Mode::Forecast { days: 5 });
        assert_eq!(mode(false, Some(3)), Mode::Forecast { days: 3 });
    }

    #[test]
    fn zip_country_defaults_to_us() {
        let cli = Cli::parse_from(["weather", "zip", "90210"]);
        let Command::Zip { country, .. } = cli.command else {
            panic!("expected zip");
        };
        assert_eq!(country, "US");
    }

    #[test]
    fn unknown_units_are_rejected() {
        let cli = Cli::parse_from(["weather", "city", "Paris", "--units", "kelvin"]);
        let Command::City { query, .. } = cli.command else {
            panic!("expected city");
        };
        assert!(query.options().is_err());
    }
}
