use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use tracing::{instrument, warn};

use crate::analytics::{UsageEvent, UsageRecord, UsageSink};
use crate::cache::DecisionCache;
use crate::flags::{EvaluationContext, FlagDefinition, KillSwitchScope};
use crate::metrics::consts::{
    DECISION_CACHE_HIT_COUNTER, DECISION_CACHE_MISS_COUNTER, FLAG_EVALUATIONS_COUNTER,
    FLAG_EVALUATION_TIME, KILL_SWITCH_BLOCKED_COUNTER, STORE_ERRORS_COUNTER,
};
use crate::metrics::{histogram, inc};
use crate::store::{FlagStore, StoreError};
use crate::targeting::{ABTestEngine, RolloutEngine};
use crate::time::TimeSource;

/// The rule that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReason {
    CacheHit,
    GlobalKillSwitch,
    FlagKillSwitch,
    TenantOverride,
    Rollout,
    Experiment,
    Default,
    UnknownFlag,
    Expired,
    StoreError,
}

impl EvaluationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationReason::CacheHit => "cache_hit",
            EvaluationReason::GlobalKillSwitch => "global_kill_switch",
            EvaluationReason::FlagKillSwitch => "flag_kill_switch",
            EvaluationReason::TenantOverride => "tenant_override",
            EvaluationReason::Rollout => "rollout",
            EvaluationReason::Experiment => "experiment",
            EvaluationReason::Default => "default",
            EvaluationReason::UnknownFlag => "unknown_flag",
            EvaluationReason::Expired => "expired",
            EvaluationReason::StoreError => "store_error",
        }
    }
}

impl fmt::Display for EvaluationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagDecision {
    pub flag_key: String,
    pub enabled: bool,
    pub reason: EvaluationReason,
    /// Variant id when an experiment decided the flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// A fresh decision and whether it holds for every user of the tenant, which
/// is what lets it live in the `(tenant, flag)` keyed cache.
struct Resolution {
    decision: FlagDecision,
    tenant_wide: bool,
}

impl Resolution {
    fn tenant_wide(decision: FlagDecision) -> Self {
        Self {
            decision,
            tenant_wide: true,
        }
    }

    fn per_user(decision: FlagDecision) -> Self {
        Self {
            decision,
            tenant_wide: false,
        }
    }
}

impl FlagDecision {
    fn new(flag_key: &str, enabled: bool, reason: EvaluationReason) -> Self {
        Self {
            flag_key: flag_key.to_string(),
            enabled,
            reason,
            variant: None,
        }
    }
}

/// Composes the decision cache, the flag store and the targeting engines into
/// a single answer per flag, reporting every evaluation to the usage sink.
pub struct FlagEvaluator {
    store: Arc<dyn FlagStore + Send + Sync>,
    cache: Arc<DecisionCache>,
    rollout: RolloutEngine,
    experiments: Arc<ABTestEngine>,
    usage: Arc<dyn UsageSink + Send + Sync>,
    time_source: Arc<dyn TimeSource + Send + Sync>,
}

impl FlagEvaluator {
    pub fn new(
        store: Arc<dyn FlagStore + Send + Sync>,
        cache: Arc<DecisionCache>,
        rollout: RolloutEngine,
        experiments: Arc<ABTestEngine>,
        usage: Arc<dyn UsageSink + Send + Sync>,
        time_source: Arc<dyn TimeSource + Send + Sync>,
    ) -> Self {
        Self {
            store,
            cache,
            rollout,
            experiments,
            usage,
            time_source,
        }
    }

    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    pub async fn is_enabled(
        &self,
        tenant_id: &str,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> bool {
        self.evaluate_with_reason(tenant_id, flag_key, context)
            .await
            .enabled
    }

    /// Every flag in the store for `context.tenant_id`. Fails only when the
    /// flag list itself can't be read; individual flags fail safe.
    #[instrument(skip_all, fields(tenant_id = %context.tenant_id))]
    pub async fn evaluate_all(
        &self,
        context: &EvaluationContext,
    ) -> Result<HashMap<String, bool>, StoreError> {
        let decisions = self.evaluate_all_with_reasons(context).await?;
        Ok(decisions
            .into_iter()
            .map(|decision| (decision.flag_key, decision.enabled))
            .collect())
    }

    pub async fn evaluate_all_with_reasons(
        &self,
        context: &EvaluationContext,
    ) -> Result<Vec<FlagDecision>, StoreError> {
        let flags = self.store.list_flags().await.map_err(|e| {
            warn!(error = %e, "failed to list flags");
            inc(
                STORE_ERRORS_COUNTER,
                &[("err".to_string(), e.error_code().to_string())],
                1,
            );
            e
        })?;

        let tenant_id = context.tenant_id.as_str();
        Ok(join_all(
            flags
                .iter()
                .map(|flag| self.evaluate_with_reason(tenant_id, &flag.key, context)),
        )
        .await)
    }

    #[instrument(skip(self, context))]
    pub async fn evaluate_with_reason(
        &self,
        tenant_id: &str,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> FlagDecision {
        let start = Instant::now();
        let decision = self.decide(tenant_id, flag_key, context).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let reason = decision.reason.as_str().to_string();
        inc(
            FLAG_EVALUATIONS_COUNTER,
            &[("reason".to_string(), reason.clone())],
            1,
        );
        histogram(FLAG_EVALUATION_TIME, &[("reason".to_string(), reason)], elapsed_ms);

        self.usage.submit(UsageEvent {
            flag_key: flag_key.to_string(),
            record: UsageRecord {
                timestamp: self.time_source.now_millis(),
                context: context.clone(),
                enabled: decision.enabled,
                response_time_ms: elapsed_ms,
                errored: decision.reason == EvaluationReason::StoreError,
            },
        });

        decision
    }

    async fn decide(
        &self,
        tenant_id: &str,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> FlagDecision {
        if let Some(enabled) = self.cache.get(tenant_id, flag_key) {
            inc(DECISION_CACHE_HIT_COUNTER, &[], 1);
            return FlagDecision::new(flag_key, enabled, EvaluationReason::CacheHit);
        }
        inc(DECISION_CACHE_MISS_COUNTER, &[], 1);

        match self.resolve(tenant_id, flag_key, context).await {
            Ok(Resolution {
                decision,
                tenant_wide,
            }) => {
                if tenant_wide {
                    self.cache.set(tenant_id, flag_key, decision.enabled, None);
                }
                decision
            }
            Err(e) => {
                warn!(tenant_id, flag_key, error = %e, "store read failed, serving fail-safe default");
                inc(
                    STORE_ERRORS_COUNTER,
                    &[("err".to_string(), e.error_code().to_string())],
                    1,
                );
                FlagDecision::new(flag_key, false, EvaluationReason::StoreError)
            }
        }
    }

    async fn resolve(
        &self,
        tenant_id: &str,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<Resolution, StoreError> {
        let global = self.store.get_kill_switch(&KillSwitchScope::Global).await?;
        if global.is_some_and(|kill_switch| kill_switch.is_active()) {
            inc(
                KILL_SWITCH_BLOCKED_COUNTER,
                &[("scope".to_string(), "global".to_string())],
                1,
            );
            return Ok(Resolution::tenant_wide(FlagDecision::new(
                flag_key,
                false,
                EvaluationReason::GlobalKillSwitch,
            )));
        }

        let scope = KillSwitchScope::Flag(flag_key.to_string());
        let flag_switch = self.store.get_kill_switch(&scope).await?;
        if flag_switch.is_some_and(|kill_switch| kill_switch.is_active()) {
            inc(
                KILL_SWITCH_BLOCKED_COUNTER,
                &[("scope".to_string(), "flag".to_string())],
                1,
            );
            return Ok(Resolution::tenant_wide(FlagDecision::new(
                flag_key,
                false,
                EvaluationReason::FlagKillSwitch,
            )));
        }

        let Some(flag) = self.store.get_flag(flag_key).await? else {
            return Ok(Resolution::tenant_wide(FlagDecision::new(
                flag_key,
                false,
                EvaluationReason::UnknownFlag,
            )));
        };
        if flag.is_expired(self.time_source.now()) {
            return Ok(Resolution::tenant_wide(FlagDecision::new(
                flag_key,
                false,
                EvaluationReason::Expired,
            )));
        }

        if let Some(tenant_override) = self.store.get_tenant_override(tenant_id, flag_key).await? {
            return Ok(Resolution::tenant_wide(FlagDecision::new(
                flag_key,
                tenant_override.enabled,
                EvaluationReason::TenantOverride,
            )));
        }

        Ok(self.target(&flag, context))
    }

    /// Rollout inclusion or a non-control variant turns the flag on. Anything
    /// else falls through to the flag's default.
    fn target(&self, flag: &FlagDefinition, context: &EvaluationContext) -> Resolution {
        if let Some(rollout) = &flag.rollout {
            if self.rollout.evaluate(context, &flag.key, rollout) {
                return Resolution::per_user(FlagDecision::new(
                    &flag.key,
                    true,
                    EvaluationReason::Rollout,
                ));
            }
        }

        if let Some(experiment) = &flag.experiment {
            let assignment = self.experiments.assign_variant(context, &flag.key, experiment);
            if !assignment.is_control {
                return Resolution::per_user(FlagDecision {
                    flag_key: flag.key.clone(),
                    enabled: true,
                    reason: EvaluationReason::Experiment,
                    variant: Some(assignment.variant_id),
                });
            }
        }

        let decision = FlagDecision::new(&flag.key, flag.default_enabled, EvaluationReason::Default);
        // another user of the same tenant may still be targeted in
        if flag.rollout.is_some() || flag.experiment.is_some() {
            Resolution::per_user(decision)
        } else {
            Resolution::tenant_wide(decision)
        }
    }
}
