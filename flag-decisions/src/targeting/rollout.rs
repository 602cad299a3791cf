use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::flags::EvaluationContext;
use crate::hashing;
use crate::targeting::within_window;
use crate::time::{millis_to_datetime, TimeSource};

const BUSINESS_DAY_START_HOUR: u32 = 9;
const BUSINESS_DAY_END_HOUR: u32 = 18;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RolloutConfig {
    /// 0-100
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub business_hours_only: bool,
    #[serde(default)]
    pub target_regions: HashSet<String>,
    #[serde(default)]
    pub user_cohorts: HashSet<String>,
}

impl RolloutConfig {
    pub fn percentage(percentage: f64) -> Self {
        Self {
            percentage,
            ..Default::default()
        }
    }
}

/// Which gate decided a rollout evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutOutcome {
    Included,
    OutsideWindow,
    OutsideBusinessHours,
    RegionNotTargeted,
    CohortNotTargeted,
    OutsideRolloutBound,
}

impl RolloutOutcome {
    pub fn is_included(self) -> bool {
        self == RolloutOutcome::Included
    }
}

pub struct RolloutEngine {
    time_source: Arc<dyn TimeSource + Send + Sync>,
    business_hours_offset: FixedOffset,
}

impl RolloutEngine {
    /// Business hours are judged in UTC.
    pub fn new(time_source: Arc<dyn TimeSource + Send + Sync>) -> Self {
        Self::with_business_hours_offset(time_source, Utc.fix())
    }

    pub fn with_business_hours_offset(
        time_source: Arc<dyn TimeSource + Send + Sync>,
        business_hours_offset: FixedOffset,
    ) -> Self {
        Self {
            time_source,
            business_hours_offset,
        }
    }

    pub fn evaluate(
        &self,
        context: &EvaluationContext,
        flag_key: &str,
        config: &RolloutConfig,
    ) -> bool {
        self.check(context, flag_key, config).is_included()
    }

    /// Runs the gates in order and stops at the first one that fails.
    pub fn check(
        &self,
        context: &EvaluationContext,
        flag_key: &str,
        config: &RolloutConfig,
    ) -> RolloutOutcome {
        let at = millis_to_datetime(
            context
                .timestamp
                .unwrap_or_else(|| self.time_source.now_millis()),
        );

        if !within_window(at, config.start_date, config.end_date) {
            return RolloutOutcome::OutsideWindow;
        }

        if config.business_hours_only && !self.is_business_hours(at) {
            return RolloutOutcome::OutsideBusinessHours;
        }

        if !config.target_regions.is_empty()
            && !context
                .effective_region()
                .is_some_and(|region| config.target_regions.contains(region))
        {
            return RolloutOutcome::RegionNotTargeted;
        }

        if !config.user_cohorts.is_empty()
            && !context
                .effective_cohort()
                .is_some_and(|cohort| config.user_cohorts.contains(cohort))
        {
            return RolloutOutcome::CohortNotTargeted;
        }

        let bucket =
            hashing::percentage_bucket(&hashing::seed(context.user_id.as_deref(), flag_key));
        if f64::from(bucket) < config.percentage {
            RolloutOutcome::Included
        } else {
            RolloutOutcome::OutsideRolloutBound
        }
    }

    fn is_business_hours(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.business_hours_offset);
        let weekday = local.weekday().number_from_monday();
        (1..=5).contains(&weekday)
            && (BUSINESS_DAY_START_HOUR..BUSINESS_DAY_END_HOUR).contains(&local.hour())
    }
}
