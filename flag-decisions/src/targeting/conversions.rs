use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::metrics::consts::{CONVERSIONS_RECORDED_COUNTER, CONVERSIONS_REJECTED_COUNTER};
use crate::metrics::inc;

#[derive(Debug, Default)]
struct ConversionStats {
    conversions: u64,
    total_value: f64,
    users: HashSet<String>,
    last_converted_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantConversionStats {
    pub variant_id: String,
    pub conversions: u64,
    pub total_value: f64,
    pub unique_users: usize,
    pub last_converted_at: i64,
}

/// Per `(test_id, variant_id)` conversion tallies.
#[derive(Debug, Default)]
pub struct ConversionLog {
    stats: DashMap<(String, String), ConversionStats>,
}

impl ConversionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never fails: malformed input is logged and dropped, since this runs
    /// next to flag evaluation and must not disturb it.
    pub fn record(
        &self,
        test_id: &str,
        variant_id: &str,
        user_id: Option<&str>,
        value: f64,
        metadata: &HashMap<String, Value>,
        at_millis: i64,
    ) {
        if test_id.is_empty() || variant_id.is_empty() {
            tracing::warn!(
                test_id,
                variant_id,
                "dropping conversion without test or variant id"
            );
            inc(
                CONVERSIONS_REJECTED_COUNTER,
                &[("reason".to_string(), "missing_id".to_string())],
                1,
            );
            return;
        }

        if !value.is_finite() {
            tracing::warn!(test_id, variant_id, value, "dropping non-finite conversion value");
            inc(
                CONVERSIONS_REJECTED_COUNTER,
                &[("reason".to_string(), "invalid_value".to_string())],
                1,
            );
            return;
        }

        let mut entry = self
            .stats
            .entry((test_id.to_string(), variant_id.to_string()))
            .or_default();
        entry.conversions += 1;
        entry.total_value += value;
        entry.last_converted_at = entry.last_converted_at.max(at_millis);
        if let Some(user_id) = user_id.filter(|u| !u.is_empty()) {
            entry.users.insert(user_id.to_string());
        }
        drop(entry);

        tracing::debug!(
            test_id,
            variant_id,
            user_id = user_id.unwrap_or(""),
            value,
            metadata_keys = metadata.len(),
            "conversion recorded"
        );
        inc(
            CONVERSIONS_RECORDED_COUNTER,
            &[("test_id".to_string(), test_id.to_string())],
            1,
        );
    }

    /// Stats for every variant of `test_id` that has converted, ordered by variant id.
    pub fn stats_for_test(&self, test_id: &str) -> Vec<VariantConversionStats> {
        let mut stats: Vec<VariantConversionStats> = self
            .stats
            .iter()
            .filter(|entry| entry.key().0 == test_id)
            .map(|entry| VariantConversionStats {
                variant_id: entry.key().1.clone(),
                conversions: entry.conversions,
                total_value: entry.total_value,
                unique_users: entry.users.len(),
                last_converted_at: entry.last_converted_at,
            })
            .collect();
        stats.sort_by(|a, b| a.variant_id.cmp(&b.variant_id));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_and_aggregates_per_variant() {
        let log = ConversionLog::new();
        let metadata = HashMap::new();
        log.record("checkout", "treatment", Some("u1"), 10.0, &metadata, 100);
        log.record("checkout", "treatment", Some("u1"), 5.0, &metadata, 200);
        log.record("checkout", "treatment", Some("u2"), 1.0, &metadata, 150);
        log.record("checkout", "control", None, 3.0, &metadata, 50);
        log.record("other-test", "control", Some("u9"), 1.0, &metadata, 50);

        let stats = log.stats_for_test("checkout");
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].variant_id, "control");
        assert_eq!(stats[0].conversions, 1);
        assert_eq!(stats[0].unique_users, 0);

        assert_eq!(stats[1].variant_id, "treatment");
        assert_eq!(stats[1].conversions, 3);
        assert_eq!(stats[1].total_value, 16.0);
        assert_eq!(stats[1].unique_users, 2);
        assert_eq!(stats[1].last_converted_at, 200);
    }

    #[test]
    fn test_malformed_conversions_are_swallowed() {
        let log = ConversionLog::new();
        let metadata = HashMap::new();
        log.record("", "control", Some("u1"), 1.0, &metadata, 0);
        log.record("test", "", Some("u1"), 1.0, &metadata, 0);
        log.record("test", "control", Some("u1"), f64::NAN, &metadata, 0);
        log.record("test", "control", Some("u1"), f64::INFINITY, &metadata, 0);

        assert!(log.stats_for_test("test").is_empty());
        assert!(log.stats_for_test("").is_empty());
    }
}
