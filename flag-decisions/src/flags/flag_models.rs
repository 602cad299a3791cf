use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::targeting::{ABTestConfig, RolloutConfig};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlagDefinition {
    pub key: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_enabled: bool,
    #[serde(default)]
    pub owner: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout: Option<RolloutConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<ABTestConfig>,
}

impl FlagDefinition {
    pub fn new(key: impl Into<String>, default_enabled: bool) -> Self {
        Self {
            key: key.into(),
            description: String::new(),
            default_enabled,
            owner: String::new(),
            created_at: Utc::now(),
            expires_at: None,
            rollout: None,
            experiment: None,
        }
    }

    pub fn with_rollout(mut self, rollout: RolloutConfig) -> Self {
        self.rollout = Some(rollout);
        self
    }

    pub fn with_experiment(mut self, experiment: ABTestConfig) -> Self {
        self.experiment = Some(experiment);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TenantOverride {
    pub tenant_id: String,
    pub flag_key: String,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_by: String,
}

impl TenantOverride {
    pub fn new(tenant_id: impl Into<String>, flag_key: impl Into<String>, enabled: bool) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            flag_key: flag_key.into(),
            enabled,
            updated_at: Utc::now(),
            updated_by: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(tag = "kind", content = "flag_key", rename_all = "snake_case")]
pub enum KillSwitchScope {
    Global,
    Flag(String),
}

impl fmt::Display for KillSwitchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillSwitchScope::Global => write!(f, "GLOBAL"),
            KillSwitchScope::Flag(flag_key) => write!(f, "{flag_key}"),
        }
    }
}

/// Kill switch record. `enabled == false` means the scope is forced off.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EmergencyOverride {
    pub scope: KillSwitchScope,
    pub enabled: bool,
    #[serde(default)]
    pub reason: String,
    pub activated_at: DateTime<Utc>,
    #[serde(default)]
    pub activated_by: String,
}

impl EmergencyOverride {
    pub fn forced_off(scope: KillSwitchScope, reason: impl Into<String>) -> Self {
        Self {
            scope,
            enabled: false,
            reason: reason.into(),
            activated_at: Utc::now(),
            activated_by: String::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.enabled
    }
}
