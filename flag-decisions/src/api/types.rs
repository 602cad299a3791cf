use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::errors::FlagError;
use crate::flags::EvaluationContext;
use crate::targeting::{Experiment, VariantAssignment, VariantConversionStats};

fn default_conversion_value() -> f64 {
    1.0
}

/// Rejects contexts the core can't key decisions on.
pub fn validate_context(context: &EvaluationContext) -> Result<(), FlagError> {
    if context.tenant_id.is_empty() {
        return Err(FlagError::EmptyField("tenant_id"));
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvaluateAllResponse {
    pub flags: HashMap<String, bool>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub context: EvaluationContext,
    pub experiments: Vec<Experiment>,
}

#[derive(Debug, Serialize)]
pub struct AssignResponse {
    pub assignments: Vec<VariantAssignment>,
    pub previous_variants: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ConversionRequest {
    #[serde(alias = "testId")]
    pub test_id: String,
    #[serde(alias = "variantId")]
    pub variant_id: String,
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
    #[serde(default = "default_conversion_value")]
    pub value: f64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct ConversionStatsResponse {
    pub test_id: String,
    pub variants: Vec<VariantConversionStats>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub flag_key: Option<String>,
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationScope {
    Entry,
    Tenant,
    Flag,
    All,
}

impl InvalidateRequest {
    pub fn scope(&self) -> Result<InvalidationScope, FlagError> {
        let tenant = self.tenant_id.as_deref().filter(|t| !t.is_empty());
        let flag = self.flag_key.as_deref().filter(|f| !f.is_empty());
        match (tenant, flag, self.all) {
            (None, None, true) => Ok(InvalidationScope::All),
            (Some(_), Some(_), false) => Ok(InvalidationScope::Entry),
            (Some(_), None, false) => Ok(InvalidationScope::Tenant),
            (None, Some(_), false) => Ok(InvalidationScope::Flag),
            (_, _, true) => Err(FlagError::BadRequest(
                "`all` can't be combined with a tenant or flag".to_string(),
            )),
            (None, None, false) => Err(FlagError::BadRequest(
                "name a tenant_id, a flag_key, or set all".to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub scope: InvalidationScope,
    pub remaining_entries: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForecastParams {
    pub hours_ahead: Option<u32>,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(r#"{"all": true}"#, Some(InvalidationScope::All))]
    #[case(r#"{"tenant_id": "t", "flag_key": "f"}"#, Some(InvalidationScope::Entry))]
    #[case(r#"{"tenant_id": "t"}"#, Some(InvalidationScope::Tenant))]
    #[case(r#"{"flag_key": "f"}"#, Some(InvalidationScope::Flag))]
    #[case(r#"{"tenant_id": "", "flag_key": "f"}"#, Some(InvalidationScope::Flag))]
    #[case(r#"{}"#, None)]
    #[case(r#"{"tenant_id": "t", "all": true}"#, None)]
    fn test_invalidation_scope(#[case] body: &str, #[case] expected: Option<InvalidationScope>) {
        let request: InvalidateRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.scope().ok(), expected);
    }

    #[test]
    fn test_conversion_defaults() {
        let request: ConversionRequest =
            serde_json::from_str(r#"{"testId": "exp", "variantId": "control"}"#).unwrap();
        assert_eq!(request.value, 1.0);
        assert!(request.user_id.is_none());
        assert!(request.metadata.is_empty());
    }

    #[test]
    fn test_validate_context() {
        assert!(validate_context(&EvaluationContext::new("acme")).is_ok());
        assert!(matches!(
            validate_context(&EvaluationContext::new("")),
            Err(FlagError::EmptyField("tenant_id"))
        ));
    }
}
