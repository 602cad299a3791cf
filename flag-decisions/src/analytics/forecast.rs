//! Near-term load forecasting from a flag's retained evaluation history.
//!
//! Evaluations are counted per wall-clock hour. The forecast is the mean
//! hourly count, bent by a single hourly seasonal pattern (when the hourly
//! counts swing enough) and compounded by the recent trend.

use std::collections::BTreeMap;

use chrono::Timelike;
use serde::Serialize;

use crate::time::millis_to_datetime;

pub const MIN_RECORDS_FOR_FORECAST: usize = 100;
pub const LOW_DATA_CONFIDENCE: f64 = 0.3;

const MILLIS_PER_HOUR: i64 = 3_600_000;
const TREND_WINDOW_HOURS: usize = 24;
const TREND_THRESHOLD: f64 = 0.1;
const MIN_BUCKETS_FOR_SEASONALITY: usize = 24;
const SEASONALITY_AMPLITUDE_THRESHOLD: f64 = 0.3;
// one week of hourly buckets
const FULL_COVERAGE_BUCKETS: f64 = 168.0;
const FULL_HISTORY_RECORDS: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl Trend {
    /// Growth factor applied per day of forecast horizon.
    fn daily_multiplier(self) -> f64 {
        match self {
            Trend::Increasing => 1.1,
            Trend::Decreasing => 0.9,
            Trend::Stable => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonalPattern {
    pub period: &'static str,
    /// Hour of day (0-23) with the highest load
    pub peak: u32,
    pub amplitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadForecast {
    pub predicted_load: f64,
    pub confidence: f64,
    pub trend: Trend,
    pub seasonal_patterns: Vec<SeasonalPattern>,
    pub hours_ahead: u32,
}

/// Forecasts evaluations per hour `hours_ahead` hours after `now_millis`,
/// from the timestamps of the retained history.
pub fn predict(timestamps: &[i64], now_millis: i64, hours_ahead: u32) -> LoadForecast {
    if timestamps.len() < MIN_RECORDS_FOR_FORECAST {
        return LoadForecast {
            predicted_load: timestamps.len() as f64,
            confidence: LOW_DATA_CONFIDENCE,
            trend: Trend::Stable,
            seasonal_patterns: Vec::new(),
            hours_ahead,
        };
    }

    let buckets = hourly_buckets(timestamps);
    let counts: Vec<f64> = buckets.values().map(|count| *count as f64).collect();

    let trend = detect_trend(&counts);
    let seasonal_patterns = detect_seasonality(&buckets).into_iter().collect::<Vec<_>>();

    let mut predicted = mean(&counts);

    let current_hour = millis_to_datetime(now_millis).hour();
    let target_hour = (current_hour + hours_ahead % 24) % 24;
    for pattern in &seasonal_patterns {
        let distance = target_hour.abs_diff(pattern.peak);
        let normalized_distance = f64::from(distance.min(24 - distance)) / 12.0;
        predicted *= 1.0 + pattern.amplitude * (1.0 - normalized_distance);
    }

    predicted *= trend
        .daily_multiplier()
        .powf(f64::from(hours_ahead) / 24.0);

    let coverage = (buckets.len() as f64 / FULL_COVERAGE_BUCKETS).min(1.0);
    let volume = (timestamps.len() as f64 / FULL_HISTORY_RECORDS).min(1.0);

    LoadForecast {
        predicted_load: predicted.max(0.0),
        confidence: (coverage + volume) / 2.0,
        trend,
        seasonal_patterns,
        hours_ahead,
    }
}

/// Evaluation counts keyed by hours since the epoch, oldest first.
fn hourly_buckets(timestamps: &[i64]) -> BTreeMap<i64, u64> {
    let mut buckets = BTreeMap::new();
    for ts in timestamps {
        *buckets.entry(ts.div_euclid(MILLIS_PER_HOUR)).or_insert(0) += 1;
    }
    buckets
}

/// Compares the last 24 hourly buckets against the 24 before them.
fn detect_trend(counts: &[f64]) -> Trend {
    let split = counts.len().saturating_sub(TREND_WINDOW_HOURS);
    let recent = &counts[split..];
    let previous = &counts[split.saturating_sub(TREND_WINDOW_HOURS)..split];

    if previous.is_empty() {
        return Trend::Stable;
    }

    let previous_mean = mean(previous);
    if previous_mean == 0.0 {
        return Trend::Stable;
    }

    let change = (mean(recent) - previous_mean) / previous_mean;
    if change > TREND_THRESHOLD {
        Trend::Increasing
    } else if change < -TREND_THRESHOLD {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

fn detect_seasonality(buckets: &BTreeMap<i64, u64>) -> Option<SeasonalPattern> {
    if buckets.len() < MIN_BUCKETS_FOR_SEASONALITY {
        return None;
    }

    // first hour wins on ties
    let (peak_hour, max) = buckets
        .iter()
        .fold(None, |best: Option<(i64, u64)>, (hour, count)| match best {
            Some((_, best_count)) if best_count >= *count => best,
            _ => Some((*hour, *count)),
        })?;
    let min = buckets.values().copied().min()?;
    if max == 0 {
        return None;
    }

    let amplitude = (max - min) as f64 / max as f64;
    if amplitude <= SEASONALITY_AMPLITUDE_THRESHOLD {
        return None;
    }

    Some(SeasonalPattern {
        period: "hourly",
        peak: u32::try_from(peak_hour.rem_euclid(24)).unwrap_or(0),
        amplitude,
    })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
