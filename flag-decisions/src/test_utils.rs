use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rand::{distributions::Alphanumeric, Rng};

use crate::flags::{EvaluationContext, FlagDefinition, TenantOverride};
use crate::store::InMemoryFlagStore;
use crate::targeting::{ABTestConfig, RolloutConfig, Variant};

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

pub fn random_context() -> EvaluationContext {
    EvaluationContext::new(random_string("tenant_", 8)).with_user_id(random_string("user_", 12))
}

/// A flag with a fixed creation date, so serialized fixtures are stable.
pub fn flag(key: &str, default_enabled: bool) -> FlagDefinition {
    let mut flag = FlagDefinition::new(key, default_enabled);
    flag.created_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    flag.owner = "growth".to_string();
    flag
}

pub fn rollout_flag(key: &str, percentage: f64) -> FlagDefinition {
    flag(key, false).with_rollout(RolloutConfig::percentage(percentage))
}

/// An experiment whose every participant lands in `treatment`.
pub fn treatment_only_experiment(test_id: &str) -> ABTestConfig {
    ABTestConfig::new(
        test_id,
        vec![Variant::new("control", 0.0), Variant::new("treatment", 100.0)],
    )
}

/// Store holding one flag per precedence rule:
/// `always-on`, `always-off`, `full-rollout`, `no-rollout`, `treated`, and
/// `overridden` (off by default, forced on for tenant `acme`).
pub fn seeded_store() -> Arc<InMemoryFlagStore> {
    let store = Arc::new(InMemoryFlagStore::new());
    store.put_flag(flag("always-on", true));
    store.put_flag(flag("always-off", false));
    store.put_flag(rollout_flag("full-rollout", 100.0));
    store.put_flag(rollout_flag("no-rollout", 0.0));
    store.put_flag(flag("treated", false).with_experiment(treatment_only_experiment("exp-treated")));
    store.put_flag(flag("overridden", false));
    store.put_tenant_override(TenantOverride::new("acme", "overridden", true));
    store
}
