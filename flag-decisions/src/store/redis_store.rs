use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use tokio::time::timeout;
use tracing::instrument;

use crate::flags::{EmergencyOverride, FlagDefinition, KillSwitchScope, TenantOverride};
use crate::store::{FlagStore, StoreError};

const KEY_PREFIX: &str = "flag_decisions";

pub fn definition_key(flag_key: &str) -> String {
    format!("{KEY_PREFIX}:flag:{flag_key}")
}

/// Set holding every flag key with a definition.
pub fn flag_index_key() -> String {
    format!("{KEY_PREFIX}:flags")
}

pub fn tenant_override_key(tenant_id: &str, flag_key: &str) -> String {
    format!("{KEY_PREFIX}:override:{tenant_id}:{flag_key}")
}

pub fn kill_switch_key(scope: &KillSwitchScope) -> String {
    match scope {
        KillSwitchScope::Global => format!("{KEY_PREFIX}:kill_switch:global"),
        KillSwitchScope::Flag(flag_key) => format!("{KEY_PREFIX}:kill_switch:flag:{flag_key}"),
    }
}

/// Flag state stored as JSON strings in Redis. Every read is bounded by the
/// configured timeout.
pub struct RedisFlagStore {
    connection: MultiplexedConnection,
    read_timeout: Duration,
}

impl RedisFlagStore {
    pub async fn new(addr: &str, read_timeout: Duration) -> Result<RedisFlagStore, StoreError> {
        let client = redis::Client::open(addr)?;
        let connection = client.get_multiplexed_async_connection().await?;

        Ok(RedisFlagStore {
            connection,
            read_timeout,
        })
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match timeout(self.read_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: String) -> Result<Option<T>, StoreError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = self.bounded(conn.get(&key)).await?;

        raw.map(|raw| decode(&key, &raw)).transpose()
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Decode {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl FlagStore for RedisFlagStore {
    #[instrument(skip(self))]
    async fn get_flag(&self, flag_key: &str) -> Result<Option<FlagDefinition>, StoreError> {
        self.get_json(definition_key(flag_key)).await
    }

    #[instrument(skip(self))]
    async fn get_tenant_override(
        &self,
        tenant_id: &str,
        flag_key: &str,
    ) -> Result<Option<TenantOverride>, StoreError> {
        self.get_json(tenant_override_key(tenant_id, flag_key)).await
    }

    #[instrument(skip(self))]
    async fn get_kill_switch(
        &self,
        scope: &KillSwitchScope,
    ) -> Result<Option<EmergencyOverride>, StoreError> {
        self.get_json(kill_switch_key(scope)).await
    }

    #[instrument(skip(self))]
    async fn list_flags(&self) -> Result<Vec<FlagDefinition>, StoreError> {
        let mut conn = self.connection.clone();
        let flag_keys: Vec<String> = self.bounded(conn.smembers(flag_index_key())).await?;
        if flag_keys.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = flag_keys.iter().map(|k| definition_key(k)).collect();
        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.get(key);
        }
        let raw: Vec<Option<String>> = self.bounded(pipe.query_async(&mut conn)).await?;

        // index entries whose definition is gone are skipped
        keys.iter()
            .zip(raw)
            .filter_map(|(key, raw)| raw.map(|raw| decode(key, &raw)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(definition_key("new-checkout"), "flag_decisions:flag:new-checkout");
        assert_eq!(flag_index_key(), "flag_decisions:flags");
        assert_eq!(
            tenant_override_key("acme", "new-checkout"),
            "flag_decisions:override:acme:new-checkout"
        );
        assert_eq!(
            kill_switch_key(&KillSwitchScope::Global),
            "flag_decisions:kill_switch:global"
        );
        assert_eq!(
            kill_switch_key(&KillSwitchScope::Flag("new-checkout".to_string())),
            "flag_decisions:kill_switch:flag:new-checkout"
        );
    }

    #[test]
    fn test_decode_reports_the_key() {
        let err = decode::<FlagDefinition>("flag_decisions:flag:x", "not json").unwrap_err();
        assert_eq!(err.error_code(), "decode");
        assert!(err.to_string().contains("flag_decisions:flag:x"));
    }

    #[test]
    fn test_decode_flag_definition() {
        let raw = r#"{"key": "x", "default_enabled": true, "created_at": "2024-01-01T00:00:00Z"}"#;
        let flag: FlagDefinition = decode("k", raw).unwrap();
        assert_eq!(flag.key, "x");
        assert!(flag.default_enabled);
        assert!(flag.rollout.is_none());
    }
}
