use crate::scope::DataScope;
use crate::token::SessionClaims;
use crate::types::{DeptId, TenantId, UserId};
use serde::{Deserialize, Serialize};

/// Per-request authenticated identity.
///
/// Values are immutable; the `with_*` setters return an updated copy so a
/// principal can be threaded through request extensions without sharing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    user_id: UserId,
    tenant_id: TenantId,
    dept_id: DeptId,
    data_scope: Option<DataScope>,
    auth_version: i64,
}

impl Principal {
    /// Creates a principal without a data scope.
    pub fn new(user_id: UserId, tenant_id: TenantId, dept_id: DeptId) -> Self {
        Self {
            user_id,
            tenant_id,
            dept_id,
            data_scope: None,
            auth_version: 0,
        }
    }

    /// Builds a principal from validated token claims.
    ///
    /// The tenant comes from the claims; callers running single-tenant
    /// replace it with [`TenantId::ROOT`].
    pub fn from_claims(claims: &SessionClaims) -> crate::Result<Self> {
        Ok(Self::new(
            claims.user_id()?,
            claims.tenant_id(),
            claims.dept_id(),
        ))
    }

    /// Authenticated user; zero when unset.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Effective tenant; zero when unset.
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Caller's department; zero when unset.
    pub fn dept_id(&self) -> DeptId {
        self.dept_id
    }

    /// Granted data scope; `None` until authorization succeeds.
    pub fn data_scope(&self) -> Option<DataScope> {
        self.data_scope
    }

    /// Authorization version marker; zero when unset.
    pub fn auth_version(&self) -> i64 {
        self.auth_version
    }

    /// Returns a copy with `user_id` replaced.
    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = user_id;
        self
    }

    /// Returns a copy with `tenant_id` replaced.
    pub fn with_tenant_id(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    /// Returns a copy with `dept_id` replaced.
    pub fn with_dept_id(mut self, dept_id: DeptId) -> Self {
        self.dept_id = dept_id;
        self
    }

    /// Returns a copy with `data_scope` replaced.
    pub fn with_data_scope(mut self, data_scope: Option<DataScope>) -> Self {
        self.data_scope = data_scope;
        self
    }

    /// Returns a copy with `auth_version` replaced.
    pub fn with_auth_version(mut self, auth_version: i64) -> Self {
        self.auth_version = auth_version;
        self
    }
}
