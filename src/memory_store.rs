use crate::permission::PermissionCode;
use crate::scope::DataScope;
use crate::store::{
    EntitlementSource, GroupingFact, PermissionFact, PermissionRule, PermissionSource,
    PolicySource, TokenStore,
};
use crate::token::SessionToken;
use crate::types::{RoleCode, TenantId, TokenId, UserId};
use crate::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    "poisoned lock".into()
}

/// In-memory token store for tests and demos.
#[derive(Debug, Default, Clone)]
pub struct MemoryTokenStore {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    tokens: RwLock<HashMap<TokenId, SessionToken>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a stored token revoked without deleting it.
    pub fn mark_revoked(&self, id: &TokenId, reason: &str) -> bool {
        let mut guard = self.inner.tokens.write().expect("poisoned lock");
        match guard.get_mut(id) {
            Some(record) => {
                record.revoked = true;
                record.revoke_reason = Some(reason.to_string());
                true
            }
            None => false,
        }
    }

    /// Number of stored tokens.
    pub fn len(&self) -> usize {
        self.inner.tokens.read().expect("poisoned lock").len()
    }

    /// Returns true if no token is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save_token(&self, record: SessionToken) -> std::result::Result<(), StoreError> {
        let mut guard = self.inner.tokens.write().map_err(poisoned)?;
        guard.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_token(
        &self,
        id: &TokenId,
    ) -> std::result::Result<Option<SessionToken>, StoreError> {
        let guard = self.inner.tokens.read().map_err(poisoned)?;
        Ok(guard.get(id).cloned())
    }

    async fn user_tokens(&self, user: UserId) -> std::result::Result<Vec<SessionToken>, StoreError> {
        let guard = self.inner.tokens.read().map_err(poisoned)?;
        let mut records: Vec<_> = guard
            .values()
            .filter(|record| record.user_id == user)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.issued_at);
        Ok(records)
    }

    async fn delete_user_token(
        &self,
        user: UserId,
        id: &TokenId,
    ) -> std::result::Result<(), StoreError> {
        let mut guard = self.inner.tokens.write().map_err(poisoned)?;
        if guard.get(id).is_some_and(|record| record.user_id == user) {
            guard.remove(id);
        }
        Ok(())
    }

    async fn delete_user_tokens(&self, user: UserId) -> std::result::Result<(), StoreError> {
        let mut guard = self.inner.tokens.write().map_err(poisoned)?;
        guard.retain(|_, record| record.user_id != user);
        Ok(())
    }
}

/// In-memory route, package and policy data for tests and demos.
///
/// Changes become visible to caches only through their reload methods.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    inner: Arc<SourceInner>,
}

#[derive(Debug, Default)]
struct SourceInner {
    routes: RwLock<Vec<PermissionRule>>,
    packages: RwLock<HashMap<TenantId, Vec<PermissionCode>>>,
    groupings: RwLock<Vec<GroupingFact>>,
    facts: RwLock<Vec<PermissionFact>>,
    unavailable: AtomicBool,
}

impl MemorySource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps an operation path or template to its guarding codes.
    pub fn add_route_permission(&self, path: impl Into<String>, codes: Vec<PermissionCode>) {
        let mut guard = self.inner.routes.write().expect("poisoned lock");
        guard.push(PermissionRule::new(path, codes));
    }

    /// Adds a code to a tenant's package.
    pub fn grant_package(&self, tenant: TenantId, code: PermissionCode) {
        let mut guard = self.inner.packages.write().expect("poisoned lock");
        guard.entry(tenant).or_default().push(code);
    }

    /// Removes a code from a tenant's package.
    pub fn revoke_package(&self, tenant: TenantId, code: &PermissionCode) {
        let mut guard = self.inner.packages.write().expect("poisoned lock");
        if let Some(codes) = guard.get_mut(&tenant) {
            codes.retain(|existing| existing != code);
        }
    }

    /// Gives `user` a role within `tenant`.
    pub fn assign_role(&self, user: UserId, role: RoleCode, tenant: TenantId) {
        let mut guard = self.inner.groupings.write().expect("poisoned lock");
        guard.push(GroupingFact { user, role, tenant });
    }

    /// Grants a code to a role within `tenant`.
    pub fn grant_role_permission(
        &self,
        role: RoleCode,
        tenant: TenantId,
        code: PermissionCode,
        scope: DataScope,
    ) {
        self.add_permission_fact(PermissionFact {
            role,
            tenant,
            code,
            scope: scope.as_str().to_string(),
        });
    }

    /// Adds a raw permission fact, scope string included.
    pub fn add_permission_fact(&self, fact: PermissionFact) {
        let mut guard = self.inner.facts.write().expect("poisoned lock");
        guard.push(fact);
    }

    /// Makes every loader fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> std::result::Result<(), StoreError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err("memory source unavailable".into());
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionSource for MemorySource {
    async fn load_route_permissions(&self) -> std::result::Result<Vec<PermissionRule>, StoreError> {
        self.check_available()?;
        let guard = self.inner.routes.read().map_err(poisoned)?;
        Ok(guard.clone())
    }
}

#[async_trait]
impl EntitlementSource for MemorySource {
    async fn load_tenant_entitlements(
        &self,
    ) -> std::result::Result<HashMap<TenantId, Vec<PermissionCode>>, StoreError> {
        self.check_available()?;
        let guard = self.inner.packages.read().map_err(poisoned)?;
        Ok(guard.clone())
    }
}

#[async_trait]
impl PolicySource for MemorySource {
    async fn load_groupings(&self) -> std::result::Result<Vec<GroupingFact>, StoreError> {
        self.check_available()?;
        let guard = self.inner.groupings.read().map_err(poisoned)?;
        Ok(guard.clone())
    }

    async fn load_permission_facts(&self) -> std::result::Result<Vec<PermissionFact>, StoreError> {
        self.check_available()?;
        let guard = self.inner.facts.read().map_err(poisoned)?;
        Ok(guard.clone())
    }
}
