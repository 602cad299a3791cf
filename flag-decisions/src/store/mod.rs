pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use thiserror::Error;

use crate::flags::{EmergencyOverride, FlagDefinition, KillSwitchScope, TenantOverride};

pub use memory::InMemoryFlagStore;
pub use redis_store::RedisFlagStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store read timed out")]
    Timeout,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to decode {key}: {message}")]
    Decode { key: String, message: String },
}

impl StoreError {
    /// Short label for logs and metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            StoreError::Timeout => "timeout",
            StoreError::Unavailable(_) => "unavailable",
            StoreError::Decode { .. } => "decode",
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

/// Read side of the backing key/attribute store. Absence of a record is
/// `Ok(None)`, never an error.
#[async_trait]
pub trait FlagStore {
    async fn get_flag(&self, flag_key: &str) -> Result<Option<FlagDefinition>, StoreError>;

    async fn get_tenant_override(
        &self,
        tenant_id: &str,
        flag_key: &str,
    ) -> Result<Option<TenantOverride>, StoreError>;

    async fn get_kill_switch(
        &self,
        scope: &KillSwitchScope,
    ) -> Result<Option<EmergencyOverride>, StoreError>;

    /// Every known flag definition, in no particular order.
    async fn list_flags(&self) -> Result<Vec<FlagDefinition>, StoreError>;
}
