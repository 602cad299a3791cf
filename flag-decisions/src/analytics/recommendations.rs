use std::collections::HashMap;

use serde::Serialize;

use crate::analytics::usage::FlagMetrics;

const SLOW_RESPONSE_MS: f64 = 100.0;
const REGION_CONCENTRATION: f64 = 0.7;
const PARTIAL_ROLLOUT_LOW: f64 = 0.1;
const PARTIAL_ROLLOUT_HIGH: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    CacheTtl,
    RegionalCache,
    StagedRollout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn weight(self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationType,
    pub priority: Priority,
    pub expected_improvement: String,
    pub description: String,
    pub implementation: String,
}

/// Tuning suggestions for one flag, highest priority first. Each rule fires
/// independently.
pub fn generate(
    metrics: &FlagMetrics,
    region_counts: &HashMap<String, u64>,
    retained_records: usize,
) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if metrics.avg_response_time > SLOW_RESPONSE_MS {
        recommendations.push(Recommendation {
            kind: RecommendationType::CacheTtl,
            priority: Priority::High,
            expected_improvement: "fewer store round trips on the evaluation path".to_string(),
            description: format!(
                "Average evaluation takes {:.1}ms, above the {SLOW_RESPONSE_MS}ms target",
                metrics.avg_response_time
            ),
            implementation: "Raise CACHE_TTL_SECONDS so more evaluations are served from the decision cache".to_string(),
        });
    }

    if let Some((region, share)) = dominant_region(region_counts, retained_records) {
        recommendations.push(Recommendation {
            kind: RecommendationType::RegionalCache,
            priority: Priority::Medium,
            expected_improvement: "lower latency for the dominant region".to_string(),
            description: format!(
                "{:.0}% of evaluations come from {region}",
                share * 100.0
            ),
            implementation: format!("Place a decision cache at the edge in {region}"),
        });
    }

    let rate = metrics.enabled_rate;
    if rate > PARTIAL_ROLLOUT_LOW && rate < PARTIAL_ROLLOUT_HIGH {
        let target = if rate >= 0.5 { "100%" } else { "0%" };
        recommendations.push(Recommendation {
            kind: RecommendationType::StagedRollout,
            priority: Priority::Low,
            expected_improvement: "simpler targeting once the flag settles".to_string(),
            description: format!(
                "Flag is enabled for {:.0}% of evaluations",
                rate * 100.0
            ),
            implementation: format!("Continue a staged rollout toward {target}"),
        });
    }

    recommendations.sort_by(|a, b| b.priority.weight().cmp(&a.priority.weight()));
    recommendations
}

fn dominant_region(
    region_counts: &HashMap<String, u64>,
    retained_records: usize,
) -> Option<(&str, f64)> {
    if retained_records == 0 {
        return None;
    }

    region_counts
        .iter()
        .map(|(region, count)| (region.as_str(), *count as f64 / retained_records as f64))
        .find(|(_, share)| *share > REGION_CONCENTRATION)
}
