use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{Datelike, Timelike};
use dashmap::DashMap;
use serde::Serialize;

use crate::analytics::forecast::{self, LoadForecast};
use crate::analytics::recommendations::{self, Recommendation};
use crate::flags::EvaluationContext;
use crate::time::{millis_to_datetime, TimeSource};

pub const MAX_HISTORY_PER_FLAG: usize = 1000;
pub const DEFAULT_FORECAST_HOURS: u32 = 24;
/// One week. Compounding the trend much further overflows.
pub const MAX_FORECAST_HOURS: u32 = 168;
const TOP_FLAGS_IN_SUMMARY: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    pub timestamp: i64,
    pub context: EvaluationContext,
    pub enabled: bool,
    pub response_time_ms: f64,
    /// The store failed and the fail-safe default was served
    pub errored: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlagMetrics {
    pub evaluation_count: u64,
    /// Over the retained window only
    pub enabled_rate: f64,
    /// Running mean over every evaluation ever recorded
    pub avg_response_time: f64,
    /// Over the retained window only
    pub error_rate: f64,
    pub unique_users: usize,
    pub tenant_distribution: HashMap<String, u64>,
}

#[derive(Debug, Default)]
struct FlagUsage {
    history: VecDeque<UsageRecord>,
    enabled_in_window: usize,
    errored_in_window: usize,
    seen_users: HashSet<String>,
    metrics: FlagMetrics,
}

impl FlagUsage {
    fn record(&mut self, record: UsageRecord) {
        let n = self.metrics.evaluation_count + 1;
        self.metrics.evaluation_count = n;
        self.metrics.avg_response_time = (self.metrics.avg_response_time * (n - 1) as f64
            + record.response_time_ms)
            / n as f64;

        *self
            .metrics
            .tenant_distribution
            .entry(record.context.tenant_id.clone())
            .or_insert(0) += 1;

        if let Some(user_id) = record.context.user_id.as_deref().filter(|u| !u.is_empty()) {
            if !self.seen_users.contains(user_id) {
                self.seen_users.insert(user_id.to_string());
            }
        }
        self.metrics.unique_users = self.seen_users.len();

        self.enabled_in_window += usize::from(record.enabled);
        self.errored_in_window += usize::from(record.errored);
        self.history.push_back(record);

        while self.history.len() > MAX_HISTORY_PER_FLAG {
            if let Some(dropped) = self.history.pop_front() {
                self.enabled_in_window -= usize::from(dropped.enabled);
                self.errored_in_window -= usize::from(dropped.errored);
            }
        }

        let retained = self.history.len() as f64;
        self.metrics.enabled_rate = self.enabled_in_window as f64 / retained;
        self.metrics.error_rate = self.errored_in_window as f64 / retained;
    }

    fn region_counts(&self) -> HashMap<String, u64> {
        count_by(&self.history, |record| record.context.effective_region())
    }
}

fn count_by<'a>(
    history: &'a VecDeque<UsageRecord>,
    key: impl Fn(&'a UsageRecord) -> Option<&'a str>,
) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    for record in history {
        if let Some(value) = key(record) {
            *counts.entry(value.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsagePattern {
    pub flag_key: String,
    pub total_records: usize,
    /// Evaluations per UTC hour of day, index 0-23
    pub hourly: Vec<u64>,
    /// Evaluations per day of week, index 0 (Sunday) - 6
    pub daily: Vec<u64>,
    pub peak_hour: Option<u32>,
    pub regions: HashMap<String, u64>,
    pub cohorts: HashMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemHealth {
    Excellent,
    Good,
    Poor,
}

impl SystemHealth {
    fn from_avg_response_time(avg_ms: f64) -> Self {
        if avg_ms < 50.0 {
            SystemHealth::Excellent
        } else if avg_ms < 100.0 {
            SystemHealth::Good
        } else {
            SystemHealth::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagUsageSummary {
    pub flag_key: String,
    pub evaluation_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub total_flags: usize,
    pub total_evaluations: u64,
    /// Mean of the per-flag average response times
    pub avg_response_time: f64,
    pub top_flags: Vec<FlagUsageSummary>,
    pub health: SystemHealth,
}

/// Per-flag evaluation history and metrics.
///
/// Each flag's state lives in its own map entry, so recording for one flag
/// never blocks another and a record is applied to history and metrics as one
/// step. Nothing is ever reset short of dropping the engine.
pub struct UsageAnalyticsEngine {
    flags: DashMap<String, FlagUsage>,
    time_source: Arc<dyn TimeSource + Send + Sync>,
}

impl UsageAnalyticsEngine {
    pub fn new(time_source: Arc<dyn TimeSource + Send + Sync>) -> Self {
        Self {
            flags: DashMap::new(),
            time_source,
        }
    }

    pub fn record_evaluation(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        enabled: bool,
        response_time_ms: f64,
    ) {
        self.record_usage(
            flag_key,
            UsageRecord {
                timestamp: self.time_source.now_millis(),
                context: context.clone(),
                enabled,
                response_time_ms,
                errored: false,
            },
        );
    }

    /// Applies an already timestamped record.
    pub fn record_usage(&self, flag_key: &str, record: UsageRecord) {
        self.flags
            .entry(flag_key.to_string())
            .or_default()
            .record(record);
    }

    pub fn get_metrics(&self, flag_key: &str) -> Option<FlagMetrics> {
        self.flags.get(flag_key).map(|usage| usage.metrics.clone())
    }

    /// Oldest first.
    pub fn history(&self, flag_key: &str) -> Vec<UsageRecord> {
        self.flags
            .get(flag_key)
            .map(|usage| usage.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn analyze_usage_pattern(&self, flag_key: &str) -> UsagePattern {
        let mut pattern = UsagePattern {
            flag_key: flag_key.to_string(),
            total_records: 0,
            hourly: vec![0; 24],
            daily: vec![0; 7],
            peak_hour: None,
            regions: HashMap::new(),
            cohorts: HashMap::new(),
        };

        let Some(usage) = self.flags.get(flag_key) else {
            return pattern;
        };

        for record in &usage.history {
            let at = millis_to_datetime(record.timestamp);
            pattern.hourly[at.hour() as usize] += 1;
            pattern.daily[at.weekday().num_days_from_sunday() as usize] += 1;
        }
        pattern.total_records = usage.history.len();
        pattern.regions = usage.region_counts();
        pattern.cohorts = count_by(&usage.history, |record| record.context.effective_cohort());
        drop(usage);

        pattern.peak_hour = pattern
            .hourly
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .max_by(|(ha, a), (hb, b)| a.cmp(b).then(hb.cmp(ha)))
            .map(|(hour, _)| hour as u32);

        pattern
    }

    pub fn predict_load(&self, flag_key: &str, hours_ahead: u32) -> LoadForecast {
        let timestamps: Vec<i64> = self
            .flags
            .get(flag_key)
            .map(|usage| usage.history.iter().map(|r| r.timestamp).collect())
            .unwrap_or_default();

        forecast::predict(&timestamps, self.time_source.now_millis(), hours_ahead)
    }

    pub fn generate_optimization_recommendations(&self, flag_key: &str) -> Vec<Recommendation> {
        let Some(usage) = self.flags.get(flag_key) else {
            return Vec::new();
        };

        recommendations::generate(&usage.metrics, &usage.region_counts(), usage.history.len())
    }

    pub fn generate_stats_summary(&self) -> StatsSummary {
        let mut flags: Vec<(String, u64, f64)> = self
            .flags
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.metrics.evaluation_count,
                    entry.metrics.avg_response_time,
                )
            })
            .collect();

        let total_evaluations: u64 = flags.iter().map(|(_, count, _)| count).sum();
        let avg_response_time = if flags.is_empty() {
            0.0
        } else {
            flags.iter().map(|(_, _, avg)| avg).sum::<f64>() / flags.len() as f64
        };

        flags.sort_by(|(ka, ca, _), (kb, cb, _)| cb.cmp(ca).then_with(|| ka.cmp(kb)));
        let total_flags = flags.len();
        let top_flags = flags
            .into_iter()
            .take(TOP_FLAGS_IN_SUMMARY)
            .map(|(flag_key, evaluation_count, _)| FlagUsageSummary {
                flag_key,
                evaluation_count,
            })
            .collect();

        StatsSummary {
            total_flags,
            total_evaluations,
            avg_response_time,
            top_flags,
            health: SystemHealth::from_avg_response_time(avg_response_time),
        }
    }
}
