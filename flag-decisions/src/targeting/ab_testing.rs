use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::flags::EvaluationContext;
use crate::hashing;
use crate::targeting::conversions::{ConversionLog, VariantConversionStats};
use crate::targeting::within_window;
use crate::time::{millis_to_datetime, TimeSource};

pub const CONTROL_VARIANT_ID: &str = "control";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Variant {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_weight")]
    pub weight: f64,
    #[serde(default)]
    pub config: Value,
}

impl Variant {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            weight,
            config: Value::Null,
        }
    }

    // Weights built in code skip deserialization, so bad ones count as zero.
    fn effective_weight(&self) -> f64 {
        if self.weight.is_finite() && self.weight > 0.0 {
            self.weight
        } else {
            0.0
        }
    }

    fn is_named_control(&self) -> bool {
        self.id == CONTROL_VARIANT_ID || self.name.eq_ignore_ascii_case(CONTROL_VARIANT_ID)
    }

    fn synthetic_control() -> Self {
        Self {
            id: CONTROL_VARIANT_ID.to_string(),
            name: "Control".to_string(),
            weight: 100.0,
            config: Value::Null,
        }
    }
}

fn deserialize_weight<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let weight = f64::deserialize(deserializer)?;
    if !weight.is_finite() || weight < 0.0 {
        return Err(serde::de::Error::custom(format!(
            "variant weight must be a non-negative number, got {weight}"
        )));
    }
    Ok(weight)
}

fn full_allocation() -> f64 {
    100.0
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ABTestConfig {
    pub test_id: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// 0-100
    #[serde(default = "full_allocation")]
    pub traffic_allocation: f64,
    #[serde(default)]
    pub target_segments: HashSet<String>,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

impl ABTestConfig {
    pub fn new(test_id: impl Into<String>, variants: Vec<Variant>) -> Self {
        Self {
            test_id: test_id.into(),
            is_active: true,
            start_date: None,
            end_date: None,
            traffic_allocation: full_allocation(),
            target_segments: HashSet::new(),
            variants,
        }
    }

    /// The variant everyone falls back to: one called "control", else the first
    /// declared variant, else a synthetic control.
    fn fallback_variant(&self) -> Cow<'_, Variant> {
        self.variants
            .iter()
            .find(|v| v.is_named_control())
            .or_else(|| self.variants.first())
            .map(Cow::Borrowed)
            .unwrap_or_else(|| Cow::Owned(Variant::synthetic_control()))
    }
}

/// One experiment in a multi-experiment assignment.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Experiment {
    pub flag_key: String,
    pub config: ABTestConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantAssignment {
    pub test_id: String,
    pub variant_id: String,
    pub variant_name: String,
    pub config: Value,
    pub is_control: bool,
    pub timestamp: i64,
}

pub struct ABTestEngine {
    time_source: Arc<dyn TimeSource + Send + Sync>,
    conversions: ConversionLog,
}

impl ABTestEngine {
    pub fn new(time_source: Arc<dyn TimeSource + Send + Sync>) -> Self {
        Self {
            time_source,
            conversions: ConversionLog::new(),
        }
    }

    /// Assigns `context` to a variant of `config`. Any failed gate (inactive
    /// test, outside its window, outside the traffic allocation, segment
    /// mismatch) yields the fallback control assignment.
    pub fn assign_variant(
        &self,
        context: &EvaluationContext,
        flag_key: &str,
        config: &ABTestConfig,
    ) -> VariantAssignment {
        let now = self.time_source.now_millis();

        if !config.is_active {
            return control_assignment(config, now);
        }

        if !within_window(millis_to_datetime(now), config.start_date, config.end_date) {
            return control_assignment(config, now);
        }

        let user_id = context.user_id.as_deref();
        let traffic_bucket =
            hashing::percentage_bucket(&hashing::seed(user_id, &format!("{flag_key}-traffic")));
        if f64::from(traffic_bucket) >= config.traffic_allocation {
            return control_assignment(config, now);
        }

        if !config.target_segments.is_empty()
            && !context
                .segments()
                .iter()
                .any(|segment| config.target_segments.contains(*segment))
        {
            return control_assignment(config, now);
        }

        let total_weight: f64 = config.variants.iter().map(Variant::effective_weight).sum();
        if !total_weight.is_finite() || total_weight <= 0.0 {
            return control_assignment(config, now);
        }

        let target = hashing::weight_bucket(
            &hashing::seed(user_id, &format!("{flag_key}-{}", config.test_id)),
            total_weight,
        );

        let mut cumulative = 0.0;
        for variant in &config.variants {
            cumulative += variant.effective_weight();
            if cumulative > target {
                return assignment(config, variant, variant.id == CONTROL_VARIANT_ID, now);
            }
        }

        control_assignment(config, now)
    }

    /// Runs experiments in order over the same context. Each result is written
    /// to `context.previous_variants[flag_key]` before the next experiment is
    /// evaluated, so later experiments can see earlier assignments.
    pub fn assign_multiple_variants(
        &self,
        context: &mut EvaluationContext,
        experiments: &[Experiment],
    ) -> Vec<VariantAssignment> {
        let mut assignments = Vec::with_capacity(experiments.len());
        for experiment in experiments {
            let assignment = self.assign_variant(context, &experiment.flag_key, &experiment.config);
            context
                .previous_variants
                .insert(experiment.flag_key.clone(), assignment.variant_id.clone());
            assignments.push(assignment);
        }
        assignments
    }

    pub fn track_conversion(
        &self,
        test_id: &str,
        variant_id: &str,
        user_id: Option<&str>,
        value: f64,
        metadata: &HashMap<String, Value>,
    ) {
        self.conversions.record(
            test_id,
            variant_id,
            user_id,
            value,
            metadata,
            self.time_source.now_millis(),
        );
    }

    pub fn conversion_stats(&self, test_id: &str) -> Vec<VariantConversionStats> {
        self.conversions.stats_for_test(test_id)
    }
}

fn assignment(
    config: &ABTestConfig,
    variant: &Variant,
    is_control: bool,
    now: i64,
) -> VariantAssignment {
    VariantAssignment {
        test_id: config.test_id.clone(),
        variant_id: variant.id.clone(),
        variant_name: variant.name.clone(),
        config: variant.config.clone(),
        is_control,
        timestamp: now,
    }
}

// Fallback assignments always report as control, even when the fallback is
// the first declared variant of a test without a control arm.
fn control_assignment(config: &ABTestConfig, now: i64) -> VariantAssignment {
    assignment(config, &config.fallback_variant(), true, now)
}
