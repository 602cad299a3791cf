use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-request targeting input. Built by the caller and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EvaluationContext {
    #[serde(alias = "tenantId")]
    pub tenant_id: String,
    #[serde(default, alias = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, alias = "userRole", skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, alias = "userCohort", skip_serializing_if = "Option::is_none")]
    pub user_cohort: Option<String>,
    /// Milliseconds since the epoch; "now" when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// flag key -> variant id, filled in across a multi-experiment assignment
    #[serde(default, alias = "previousVariants")]
    pub previous_variants: HashMap<String, String>,
}

impl EvaluationContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_cohort(mut self, cohort: impl Into<String>) -> Self {
        self.user_cohort = Some(cohort.into());
        self
    }

    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_segments<S: Into<String>>(self, segments: impl IntoIterator<Item = S>) -> Self {
        let segments = segments
            .into_iter()
            .map(|s| Value::String(s.into()))
            .collect();
        self.with_metadata("segments", Value::Array(segments))
    }

    /// `metadata.segments`, accepting either a list of strings or a single string.
    /// Anything else counts as no segments.
    pub fn segments(&self) -> Vec<&str> {
        match self.metadata.get("segments") {
            Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(segment)) => vec![segment.as_str()],
            _ => Vec::new(),
        }
    }

    /// The context region, falling back to `metadata.region`.
    pub fn effective_region(&self) -> Option<&str> {
        self.region
            .as_deref()
            .or_else(|| self.metadata.get("region").and_then(Value::as_str))
    }

    /// The context cohort, falling back to `metadata.user_cohort`.
    pub fn effective_cohort(&self) -> Option<&str> {
        self.user_cohort
            .as_deref()
            .or_else(|| self.metadata.get("user_cohort").and_then(Value::as_str))
    }
}
