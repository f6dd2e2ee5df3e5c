//! Statistical merge of canonical observations.
//!
//! Numeric fields become the mean of the sources that reported them, rounded
//! to two decimals. The two categorical fields go to a case-insensitive
//! plurality vote. A single source passes through untouched.

use chrono::{Days, NaiveDate};

use crate::model::{DailyAggregate, DayContribution, ForecastDay, Observation, SourceEnvelope};

/// Merge `observations` (in dispatch order) into one.
///
/// Returns `None` only when there is nothing to merge.
pub fn merge_observations<'a, I>(observations: I) -> Option<Observation>
where
    I: IntoIterator<Item = &'a Observation>,
{
    let sources: Vec<&Observation> = observations.into_iter().collect();

    match sources.as_slice() {
        [] => None,
        [only] => Some((*only).clone()),
        _ => Some(merge_many(&sources)),
    }
}

fn merge_many(sources: &[&Observation]) -> Observation {
    let mean_of =
        |field: fn(&Observation) -> Option<f64>| mean(sources.iter().filter_map(|o| field(o)));

    Observation {
        temp: mean_of(|o| o.temp),
        feels_like: mean_of(|o| o.feels_like),
        humidity: mean_of(|o| o.humidity),
        pressure: mean_of(|o| o.pressure),
        wind_speed: mean_of(|o| o.wind_speed),
        wind_direction: mean_of(|o| o.wind_direction),
        description: plurality(sources.iter().filter_map(|o| o.description.as_deref())),
        condition: plurality(sources.iter().filter_map(|o| o.condition.as_deref())),
        icon: sources.first().and_then(|o| o.icon.clone()),
        clouds: mean_of(|o| o.clouds),
        uv_index: mean_of(|o| o.uv_index),
        visibility: mean_of(|o| o.visibility),
        rain_1h: mean_of(|o| o.rain_1h),
        snow_1h: mean_of(|o| o.snow_1h),
        aqi: mean_of(|o| o.aqi),
        is_day: sources.iter().find_map(|o| o.is_day),
    }
}

/// Arithmetic mean rounded to two decimals; `None` when no value was reported.
fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0u32), |(sum, n), v| (sum + v, n + 1));
    if count == 0 {
        return None;
    }
    Some(round2(sum / f64::from(count)))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Most frequent value, compared case-insensitively.
///
/// A value must beat the current leader strictly to take over, so ties go to
/// whichever was seen first. The winner keeps its first-seen spelling.
fn plurality<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    // (normalised key, first-seen spelling, count), in first-seen order
    let mut tally: Vec<(String, &str, usize)> = Vec::new();

    for value in values {
        let key = value.to_lowercase();
        match tally.iter_mut().find(|(k, _, _)| *k == key) {
            Some((_, _, count)) => *count += 1,
            None => tally.push((key, value, 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (_, spelling, count) in &tally {
        if best.is_none_or(|(_, best_count)| *count > best_count) {
            best = Some((*spelling, *count));
        }
    }
    best.map(|(spelling, _)| spelling.to_string())
}

/// The calendar dates `today, today + 1, …` for `days` days.
pub fn date_sequence(today: NaiveDate, days: u8) -> Vec<NaiveDate> {
    (0..u64::from(days))
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .collect()
}

/// Merge per-provider forecasts day by day.
///
/// Alignment is positional: day `i` merges the `i`-th entry of every provider
/// whose sequence is long enough, regardless of the dates those entries carry.
/// Days nobody covers are left out.
pub fn align_days(
    sources: &[SourceEnvelope<Vec<ForecastDay>>],
    today: NaiveDate,
    days: u8,
) -> Vec<DailyAggregate> {
    date_sequence(today, days)
        .into_iter()
        .enumerate()
        .filter_map(|(index, date)| {
            let contributions: Vec<DayContribution> = sources
                .iter()
                .filter_map(|source| {
                    source.data.get(index).map(|forecast| DayContribution {
                        provider: source.provider,
                        forecast: forecast.clone(),
                    })
                })
                .collect();

            let aggregated =
                merge_observations(contributions.iter().map(|c| &c.forecast.observation))?;

            Some(DailyAggregate {
                date,
                sources: contributions,
                aggregated,
            })
        })
        .collect()
}
