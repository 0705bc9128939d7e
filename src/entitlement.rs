use crate::cache::SnapshotCell;
use crate::error::{Error, Result};
use crate::permission::PermissionCode;
use crate::store::EntitlementSource;
use crate::types::TenantId;
use std::collections::{HashMap, HashSet};

type EntitlementIndex = HashMap<TenantId, HashSet<PermissionCode>>;

/// Tenant-to-entitled-codes snapshot, replaced wholesale on reload.
#[derive(Debug)]
pub struct EntitlementCache {
    index: SnapshotCell<EntitlementIndex>,
}

impl EntitlementCache {
    /// Builds the cache from `source`.
    ///
    /// There is no empty fallback: a failing source is returned as
    /// [`Error::InitialLoad`] and the caller must not start serving.
    pub async fn load_from<E>(source: &E) -> Result<Self>
    where
        E: EntitlementSource + ?Sized,
    {
        let data = source
            .load_tenant_entitlements()
            .await
            .map_err(|source| Error::InitialLoad {
                cache: "tenant entitlement",
                source,
            })?;
        let cache = Self {
            index: SnapshotCell::new(HashMap::new()),
        };
        cache.install(data);
        Ok(cache)
    }

    /// Reloads every tenant's entitlements.
    ///
    /// On failure the current snapshot keeps serving and the error is returned.
    pub async fn reload<E>(&self, source: &E) -> Result<usize>
    where
        E: EntitlementSource + ?Sized,
    {
        match source.load_tenant_entitlements().await {
            Ok(data) => Ok(self.install(data)),
            Err(err) => {
                tracing::error!(error = %err, "entitlement reload failed; keeping previous snapshot");
                Err(Error::Store(err))
            }
        }
    }

    fn install(&self, data: HashMap<TenantId, Vec<PermissionCode>>) -> usize {
        let index: EntitlementIndex = data
            .into_iter()
            .map(|(tenant, codes)| (tenant, codes.into_iter().collect()))
            .collect();
        let tenants = index.len();
        self.index.replace(index);
        tracing::info!(tenants, "tenant entitlements loaded");
        tenants
    }

    /// Returns true iff `code` is in the loaded set of `tenant`.
    ///
    /// Unknown tenants are denied.
    pub fn allowed(&self, tenant: TenantId, code: &PermissionCode) -> bool {
        self.index
            .load()
            .get(&tenant)
            .is_some_and(|codes| codes.contains(code))
    }

    /// Returns true if any of `codes` is entitled to `tenant`.
    pub fn allows_any(&self, tenant: TenantId, codes: &[PermissionCode]) -> bool {
        let index = self.index.load();
        let Some(entitled) = index.get(&tenant) else {
            return false;
        };
        codes.iter().any(|code| entitled.contains(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::executor::block_on;
    use std::sync::Mutex;

    fn code(value: &str) -> PermissionCode {
        PermissionCode::try_from(value).unwrap()
    }

    #[derive(Default)]
    struct TestSource {
        data: Mutex<HashMap<TenantId, Vec<PermissionCode>>>,
        failing: Mutex<bool>,
    }

    #[async_trait]
    impl EntitlementSource for TestSource {
        async fn load_tenant_entitlements(
            &self,
        ) -> std::result::Result<HashMap<TenantId, Vec<PermissionCode>>, crate::StoreError>
        {
            if *self.failing.lock().unwrap() {
                return Err("package table unavailable".into());
            }
            Ok(self.data.lock().unwrap().clone())
        }
    }

    fn source_with(tenant: i64, codes: &[&str]) -> TestSource {
        let source = TestSource::default();
        source.data.lock().unwrap().insert(
            TenantId::new(tenant),
            codes.iter().map(|value| code(value)).collect(),
        );
        source
    }

    #[test]
    fn allowed_should_reflect_loaded_set() {
        let source = source_with(42, &["order:read"]);
        let cache = block_on(EntitlementCache::load_from(&source)).unwrap();

        assert!(cache.allowed(TenantId::new(42), &code("order:read")));
        assert!(!cache.allowed(TenantId::new(42), &code("order:items:read")));
    }

    #[test]
    fn unknown_tenant_should_be_denied() {
        let source = source_with(42, &["order:read"]);
        let cache = block_on(EntitlementCache::load_from(&source)).unwrap();

        assert!(!cache.allowed(TenantId::new(7), &code("order:read")));
        assert!(!cache.allows_any(TenantId::new(7), &[code("order:read")]));
    }

    #[test]
    fn allows_any_should_accept_one_entitled_code() {
        let source = source_with(42, &["audit:view"]);
        let cache = block_on(EntitlementCache::load_from(&source)).unwrap();

        assert!(cache.allows_any(
            TenantId::new(42),
            &[code("order:read"), code("audit:view")]
        ));
        assert!(!cache.allows_any(TenantId::new(42), &[]));
    }

    #[test]
    fn initial_load_failure_should_abort_construction() {
        let source = TestSource::default();
        *source.failing.lock().unwrap() = true;

        let result = block_on(EntitlementCache::load_from(&source));
        assert!(matches!(result, Err(Error::InitialLoad { .. })));
    }

    #[test]
    fn reload_should_replace_snapshot_wholesale() {
        let source = source_with(42, &["order:read"]);
        let cache = block_on(EntitlementCache::load_from(&source)).unwrap();

        {
            let mut data = source.data.lock().unwrap();
            data.clear();
            data.insert(TenantId::new(43), vec![code("order:read")]);
        }
        let tenants = block_on(cache.reload(&source)).unwrap();

        assert_eq!(tenants, 1);
        assert!(!cache.allowed(TenantId::new(42), &code("order:read")));
        assert!(cache.allowed(TenantId::new(43), &code("order:read")));
    }

    #[test]
    fn failed_reload_should_keep_stale_snapshot() {
        let source = source_with(42, &["order:read"]);
        let cache = block_on(EntitlementCache::load_from(&source)).unwrap();

        *source.failing.lock().unwrap() = true;
        assert!(block_on(cache.reload(&source)).is_err());
        assert!(cache.allowed(TenantId::new(42), &code("order:read")));
    }
}
