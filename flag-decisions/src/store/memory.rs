use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::flags::{EmergencyOverride, FlagDefinition, KillSwitchScope, TenantOverride};
use crate::store::{FlagStore, StoreError};

/// Process-local store for tests and local runs. Reads can be made to fail
/// with `set_unavailable` to exercise the fail-safe path.
#[derive(Debug, Default)]
pub struct InMemoryFlagStore {
    flags: DashMap<String, FlagDefinition>,
    overrides: DashMap<(String, String), TenantOverride>,
    kill_switches: DashMap<KillSwitchScope, EmergencyOverride>,
    unavailable: AtomicBool,
    reads: AtomicUsize,
}

impl InMemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_flag(&self, flag: FlagDefinition) {
        self.flags.insert(flag.key.clone(), flag);
    }

    pub fn remove_flag(&self, flag_key: &str) {
        self.flags.remove(flag_key);
    }

    pub fn put_tenant_override(&self, tenant_override: TenantOverride) {
        self.overrides.insert(
            (
                tenant_override.tenant_id.clone(),
                tenant_override.flag_key.clone(),
            ),
            tenant_override,
        );
    }

    pub fn remove_tenant_override(&self, tenant_id: &str, flag_key: &str) {
        self.overrides
            .remove(&(tenant_id.to_string(), flag_key.to_string()));
    }

    pub fn put_kill_switch(&self, kill_switch: EmergencyOverride) {
        self.kill_switches
            .insert(kill_switch.scope.clone(), kill_switch);
    }

    pub fn remove_kill_switch(&self, scope: &KillSwitchScope) {
        self.kill_switches.remove(scope);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of reads served or refused so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn read(&self) -> Result<(), StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FlagStore for InMemoryFlagStore {
    async fn get_flag(&self, flag_key: &str) -> Result<Option<FlagDefinition>, StoreError> {
        self.read()?;
        Ok(self.flags.get(flag_key).map(|flag| flag.clone()))
    }

    async fn get_tenant_override(
        &self,
        tenant_id: &str,
        flag_key: &str,
    ) -> Result<Option<TenantOverride>, StoreError> {
        self.read()?;
        Ok(self
            .overrides
            .get(&(tenant_id.to_string(), flag_key.to_string()))
            .map(|o| o.clone()))
    }

    async fn get_kill_switch(
        &self,
        scope: &KillSwitchScope,
    ) -> Result<Option<EmergencyOverride>, StoreError> {
        self.read()?;
        Ok(self.kill_switches.get(scope).map(|k| k.clone()))
    }

    async fn list_flags(&self) -> Result<Vec<FlagDefinition>, StoreError> {
        self.read()?;
        Ok(self.flags.iter().map(|flag| flag.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_absent_records_are_none() {
        let store = InMemoryFlagStore::new();
        assert_eq!(store.get_flag("x").await, Ok(None));
        assert_eq!(store.get_tenant_override("t", "x").await, Ok(None));
        assert_eq!(store.get_kill_switch(&KillSwitchScope::Global).await, Ok(None));
        assert_eq!(store.list_flags().await, Ok(vec![]));
    }

    #[tokio::test]
    async fn test_put_and_remove() {
        let store = InMemoryFlagStore::new();
        store.put_flag(FlagDefinition::new("x", true));
        store.put_tenant_override(TenantOverride::new("t", "x", false));
        store.put_kill_switch(EmergencyOverride::forced_off(
            KillSwitchScope::Flag("x".to_string()),
            "incident",
        ));

        assert!(store.get_flag("x").await.unwrap().unwrap().default_enabled);
        assert!(!store.get_tenant_override("t", "x").await.unwrap().unwrap().enabled);
        assert!(store
            .get_kill_switch(&KillSwitchScope::Flag("x".to_string()))
            .await
            .unwrap()
            .unwrap()
            .is_active());
        assert_eq!(store.list_flags().await.unwrap().len(), 1);

        store.remove_flag("x");
        store.remove_tenant_override("t", "x");
        store.remove_kill_switch(&KillSwitchScope::Flag("x".to_string()));
        assert_eq!(store.get_flag("x").await, Ok(None));
        assert_eq!(store.get_tenant_override("t", "x").await, Ok(None));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_reads() {
        let store = InMemoryFlagStore::new();
        store.put_flag(FlagDefinition::new("x", true));
        store.set_unavailable(true);

        let err = store.get_flag("x").await.unwrap_err();
        assert_eq!(err.error_code(), "unavailable");
        assert_eq!(store.reads(), 1);

        store.set_unavailable(false);
        assert!(store.get_flag("x").await.unwrap().is_some());
        assert_eq!(store.reads(), 2);
    }
}
