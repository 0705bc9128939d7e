use crate::error::StoreError;
use crate::permission::PermissionCode;
use crate::token::SessionToken;
use crate::types::{RoleCode, TenantId, TokenId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// API operation path with the permission codes guarding it.
///
/// A path containing a `:name` parameter segment or a `*` glob is dynamic;
/// every other path is matched literally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Operation path or path template.
    pub path: String,
    /// Guarding codes in evaluation order.
    pub codes: Vec<PermissionCode>,
}

impl PermissionRule {
    /// Creates a rule.
    pub fn new(path: impl Into<String>, codes: Vec<PermissionCode>) -> Self {
        Self {
            path: path.into(),
            codes,
        }
    }
}

/// User-to-role grouping within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupingFact {
    /// Subject holding the role.
    pub user: UserId,
    /// Role held.
    pub role: RoleCode,
    /// Tenant the grant applies to.
    pub tenant: TenantId,
}

/// Role-to-permission grant within a tenant.
///
/// `scope` is kept as loaded; the policy engine parses it and discards facts
/// whose scope is not one of `SELF`, `DEPT`, `DEPT_SUB`, `ALL`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionFact {
    /// Role receiving the grant.
    pub role: RoleCode,
    /// Tenant the grant applies to.
    pub tenant: TenantId,
    /// Granted permission code.
    pub code: PermissionCode,
    /// Raw data scope string.
    pub scope: String,
}

/// Loader for the operation-to-permission mapping.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// Returns every API permission rule; later duplicates of a literal path
    /// replace earlier ones.
    async fn load_route_permissions(&self) -> std::result::Result<Vec<PermissionRule>, StoreError>;
}

/// Loader for tenant package entitlements.
#[async_trait]
pub trait EntitlementSource: Send + Sync {
    /// Returns the codes granted by each tenant's current package.
    async fn load_tenant_entitlements(
        &self,
    ) -> std::result::Result<HashMap<TenantId, Vec<PermissionCode>>, StoreError>;
}

/// Read-only adapter translating role data into policy facts.
///
/// The write-back hooks exist for parity with policy adapters but are no-ops:
/// policy data changes through the owning application's own flows, followed
/// by a full reload.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Returns every user-to-role grouping.
    async fn load_groupings(&self) -> std::result::Result<Vec<GroupingFact>, StoreError>;

    /// Returns every role-to-permission grant.
    async fn load_permission_facts(&self) -> std::result::Result<Vec<PermissionFact>, StoreError>;

    /// No-op.
    async fn save_policy(&self) -> std::result::Result<(), StoreError> {
        Ok(())
    }

    /// No-op.
    async fn add_policy(&self, _fact: &PermissionFact) -> std::result::Result<(), StoreError> {
        Ok(())
    }

    /// No-op.
    async fn remove_policy(&self, _fact: &PermissionFact) -> std::result::Result<(), StoreError> {
        Ok(())
    }

    /// No-op.
    async fn remove_filtered_policy(
        &self,
        _field_index: usize,
        _values: &[String],
    ) -> std::result::Result<(), StoreError> {
        Ok(())
    }
}

/// Persistence for issued session tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persists a newly issued token.
    async fn save_token(&self, record: SessionToken) -> std::result::Result<(), StoreError>;

    /// Looks up a token by identifier.
    async fn get_token(
        &self,
        id: &TokenId,
    ) -> std::result::Result<Option<SessionToken>, StoreError>;

    /// Returns every token persisted for a user.
    async fn user_tokens(&self, user: UserId)
    -> std::result::Result<Vec<SessionToken>, StoreError>;

    /// Deletes one token of a user.
    async fn delete_user_token(
        &self,
        user: UserId,
        id: &TokenId,
    ) -> std::result::Result<(), StoreError>;

    /// Deletes every token of a user.
    async fn delete_user_tokens(&self, user: UserId) -> std::result::Result<(), StoreError>;
}
