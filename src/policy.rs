use crate::cache::SnapshotCell;
use crate::error::{Error, Result};
use crate::permission::{Action, PermissionCode};
use crate::scope::DataScope;
use crate::store::{GroupingFact, PermissionFact, PolicySource};
use crate::types::{RoleCode, TenantId, UserId};
use std::collections::{HashMap, HashSet};

/// Authorization decision for one permission code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Permission is granted with the given row scope.
    Allow { scope: DataScope },
    /// Permission is denied.
    Deny,
}

impl Decision {
    /// Returns true for [`Decision::Allow`].
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    /// Returns the granted scope, if any.
    pub fn scope(self) -> Option<DataScope> {
        match self {
            Decision::Allow { scope } => Some(scope),
            Decision::Deny => None,
        }
    }
}

/// Tuple evaluated by a [`PolicyEngine`].
#[derive(Debug, Clone, Copy)]
pub struct PolicyRequest<'a> {
    pub user: UserId,
    pub tenant: TenantId,
    pub code: &'a PermissionCode,
    pub action: &'a Action,
}

/// Decides allow/deny for `(user, tenant, code, action)` tuples.
pub trait PolicyEngine: Send + Sync {
    /// Evaluates one request; anything not explicitly allowed is denied.
    fn enforce(&self, request: &PolicyRequest<'_>) -> Decision;
}

type GrantKey = (TenantId, PermissionCode, Action);

#[derive(Debug, Default)]
struct PolicyIndex {
    roles: HashMap<(UserId, TenantId), HashSet<RoleCode>>,
    grants: HashMap<GrantKey, Vec<(RoleCode, DataScope)>>,
}

impl PolicyIndex {
    fn holds(&self, user: UserId, role: &RoleCode, tenant: TenantId) -> bool {
        self.roles
            .get(&(user, tenant))
            .is_some_and(|roles| roles.contains(role))
    }
}

/// Outcome of a successful (re)load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyLoadReport {
    /// Grouping facts indexed.
    pub groupings: usize,
    /// Permission facts indexed.
    pub permissions: usize,
    /// Permission facts skipped because their scope is unknown.
    pub rejected: usize,
}

/// In-memory role-based evaluator over grouping and permission facts.
///
/// A request is allowed when the user holds `admin` in the root tenant, or
/// holds a role in the request tenant that is granted the code and action
/// in that same tenant. Facts change only through [`RbacPolicyEngine::reload`].
#[derive(Debug, Default)]
pub struct RbacPolicyEngine {
    index: SnapshotCell<PolicyIndex>,
}

impl RbacPolicyEngine {
    /// Creates an engine that denies everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an engine from `source`; a failing source is [`Error::InitialLoad`].
    pub async fn load_from<P>(source: &P) -> Result<Self>
    where
        P: PolicySource + ?Sized,
    {
        let (groupings, facts) = load_facts(source)
            .await
            .map_err(|source| Error::InitialLoad {
                cache: "policy",
                source,
            })?;
        let engine = Self::new();
        engine.install(groupings, facts);
        Ok(engine)
    }

    /// Reloads all facts; on failure the current facts keep serving.
    pub async fn reload<P>(&self, source: &P) -> Result<PolicyLoadReport>
    where
        P: PolicySource + ?Sized,
    {
        match load_facts(source).await {
            Ok((groupings, facts)) => Ok(self.install(groupings, facts)),
            Err(err) => {
                tracing::error!(error = %err, "policy reload failed; keeping previous facts");
                Err(Error::Store(err))
            }
        }
    }

    fn install(&self, groupings: Vec<GroupingFact>, facts: Vec<PermissionFact>) -> PolicyLoadReport {
        let mut index = PolicyIndex::default();
        let mut report = PolicyLoadReport {
            groupings: groupings.len(),
            ..PolicyLoadReport::default()
        };

        for fact in groupings {
            index
                .roles
                .entry((fact.user, fact.tenant))
                .or_default()
                .insert(fact.role);
        }

        for fact in facts {
            let scope = match fact.scope.parse::<DataScope>() {
                Ok(scope) => scope,
                Err(_) => {
                    tracing::warn!(
                        role = %fact.role,
                        tenant = %fact.tenant,
                        code = %fact.code,
                        scope = %fact.scope,
                        "skipping permission fact with unknown data scope"
                    );
                    report.rejected += 1;
                    continue;
                }
            };
            index
                .grants
                .entry((fact.tenant, fact.code, Action::invoke()))
                .or_default()
                .push((fact.role, scope));
            report.permissions += 1;
        }

        self.index.replace(index);
        tracing::info!(
            groupings = report.groupings,
            permissions = report.permissions,
            rejected = report.rejected,
            "policy facts loaded"
        );
        report
    }

    /// Returns the roles `user` holds in `tenant`.
    pub fn roles_for(&self, user: UserId, tenant: TenantId) -> Vec<RoleCode> {
        let mut roles: Vec<_> = self
            .index
            .load()
            .roles
            .get(&(user, tenant))
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default();
        roles.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        roles
    }

    /// Returns true if `user` holds the admin role in the root tenant.
    pub fn is_root_admin(&self, user: UserId) -> bool {
        self.index
            .load()
            .holds(user, &RoleCode::admin(), TenantId::ROOT)
    }
}

impl PolicyEngine for RbacPolicyEngine {
    fn enforce(&self, request: &PolicyRequest<'_>) -> Decision {
        let index = self.index.load();

        if index.holds(request.user, &RoleCode::admin(), TenantId::ROOT) {
            return Decision::Allow {
                scope: DataScope::All,
            };
        }

        let key = (request.tenant, request.code.clone(), request.action.clone());
        let Some(grants) = index.grants.get(&key) else {
            return Decision::Deny;
        };
        grants
            .iter()
            .find(|(role, _)| index.holds(request.user, role, request.tenant))
            .map_or(Decision::Deny, |(_, scope)| Decision::Allow { scope: *scope })
    }
}

async fn load_facts<P>(
    source: &P,
) -> std::result::Result<(Vec<GroupingFact>, Vec<PermissionFact>), crate::StoreError>
where
    P: PolicySource + ?Sized,
{
    let groupings = source.load_groupings().await?;
    let facts = source.load_permission_facts().await?;
    Ok((groupings, facts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::executor::block_on;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct TestSource {
        groupings: Mutex<Vec<GroupingFact>>,
        facts: Mutex<Vec<PermissionFact>>,
        failing: AtomicBool,
    }

    impl TestSource {
        fn assign(&self, user: i64, role: &str, tenant: i64) {
            self.groupings.lock().unwrap().push(GroupingFact {
                user: UserId::new(user),
                role: RoleCode::new(role).unwrap(),
                tenant: TenantId::new(tenant),
            });
        }

        fn grant(&self, role: &str, tenant: i64, code: &str, scope: &str) {
            self.facts.lock().unwrap().push(PermissionFact {
                role: RoleCode::new(role).unwrap(),
                tenant: TenantId::new(tenant),
                code: PermissionCode::new(code).unwrap(),
                scope: scope.to_string(),
            });
        }
    }

    #[async_trait]
    impl PolicySource for TestSource {
        async fn load_groupings(&self) -> std::result::Result<Vec<GroupingFact>, crate::StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err("role table unavailable".into());
            }
            Ok(self.groupings.lock().unwrap().clone())
        }

        async fn load_permission_facts(
            &self,
        ) -> std::result::Result<Vec<PermissionFact>, crate::StoreError> {
            Ok(self.facts.lock().unwrap().clone())
        }
    }

    fn decide(engine: &RbacPolicyEngine, user: i64, tenant: i64, code: &str) -> Decision {
        let code = PermissionCode::new(code).unwrap();
        engine.enforce(&PolicyRequest {
            user: UserId::new(user),
            tenant: TenantId::new(tenant),
            code: &code,
            action: &Action::invoke(),
        })
    }

    #[test]
    fn role_grant_should_allow_with_fact_scope() {
        let source = TestSource::default();
        source.assign(7, "clerk", 42);
        source.grant("clerk", 42, "order:read", "DEPT");
        let engine = block_on(RbacPolicyEngine::load_from(&source)).unwrap();

        assert_eq!(
            decide(&engine, 7, 42, "order:read"),
            Decision::Allow {
                scope: DataScope::Dept
            }
        );
        assert_eq!(decide(&engine, 7, 42, "order:write"), Decision::Deny);
    }

    #[test]
    fn root_admin_should_bypass_tenant_matching() {
        let source = TestSource::default();
        source.assign(1, "admin", 1);
        let engine = block_on(RbacPolicyEngine::load_from(&source)).unwrap();

        for tenant in [1, 2, 42] {
            let decision = decide(&engine, 1, tenant, "anything:at:all");
            assert_eq!(
                decision,
                Decision::Allow {
                    scope: DataScope::All
                }
            );
        }
        assert!(engine.is_root_admin(UserId::new(1)));
    }

    #[test]
    fn admin_in_other_tenant_should_not_bypass() {
        let source = TestSource::default();
        source.assign(9, "admin", 2);
        let engine = block_on(RbacPolicyEngine::load_from(&source)).unwrap();

        assert_eq!(decide(&engine, 9, 3, "order:read"), Decision::Deny);
        assert!(!engine.is_root_admin(UserId::new(9)));
    }

    #[test]
    fn role_in_tenant_two_should_be_denied_in_tenant_three() {
        let source = TestSource::default();
        source.assign(7, "clerk", 2);
        source.grant("clerk", 2, "order:read", "ALL");
        source.grant("clerk", 3, "order:read", "ALL");
        let engine = block_on(RbacPolicyEngine::load_from(&source)).unwrap();

        assert!(decide(&engine, 7, 2, "order:read").is_allowed());
        assert_eq!(decide(&engine, 7, 3, "order:read"), Decision::Deny);
    }

    #[test]
    fn other_actions_should_be_denied() {
        let source = TestSource::default();
        source.assign(7, "clerk", 42);
        source.grant("clerk", 42, "order:read", "ALL");
        let engine = block_on(RbacPolicyEngine::load_from(&source)).unwrap();
        let code = PermissionCode::new("order:read").unwrap();

        let decision = engine.enforce(&PolicyRequest {
            user: UserId::new(7),
            tenant: TenantId::new(42),
            code: &code,
            action: &Action::from_string("W".to_string()),
        });
        assert_eq!(decision, Decision::Deny);
    }

    #[test]
    fn first_matching_fact_should_decide_scope() {
        let source = TestSource::default();
        source.assign(7, "clerk", 42);
        source.assign(7, "lead", 42);
        source.grant("clerk", 42, "order:read", "SELF");
        source.grant("lead", 42, "order:read", "ALL");
        let engine = block_on(RbacPolicyEngine::load_from(&source)).unwrap();

        assert_eq!(
            decide(&engine, 7, 42, "order:read").scope(),
            Some(DataScope::SelfOnly)
        );
    }

    #[test]
    fn unknown_scope_fact_should_be_skipped() {
        let source = TestSource::default();
        source.assign(7, "clerk", 42);
        source.grant("clerk", 42, "order:read", "GLOBAL");
        let engine = RbacPolicyEngine::new();

        let report = block_on(engine.reload(&source)).unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.permissions, 0);
        assert_eq!(decide(&engine, 7, 42, "order:read"), Decision::Deny);
    }

    #[test]
    fn failed_reload_should_keep_facts() {
        let source = TestSource::default();
        source.assign(7, "clerk", 42);
        source.grant("clerk", 42, "order:read", "ALL");
        let engine = block_on(RbacPolicyEngine::load_from(&source)).unwrap();

        source.failing.store(true, Ordering::SeqCst);
        assert!(matches!(block_on(engine.reload(&source)), Err(Error::Store(_))));
        assert!(decide(&engine, 7, 42, "order:read").is_allowed());
        assert!(matches!(
            block_on(RbacPolicyEngine::load_from(&source)),
            Err(Error::InitialLoad { .. })
        ));
    }

    #[test]
    fn roles_for_should_list_tenant_roles() {
        let source = TestSource::default();
        source.assign(7, "lead", 42);
        source.assign(7, "clerk", 42);
        source.assign(7, "auditor", 43);
        let engine = block_on(RbacPolicyEngine::load_from(&source)).unwrap();

        let roles = engine.roles_for(UserId::new(7), TenantId::new(42));
        let names: Vec<_> = roles.iter().map(RoleCode::as_str).collect();
        assert_eq!(names, vec!["clerk", "lead"]);
    }
}
