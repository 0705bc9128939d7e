use crate::config::GuardConfig;
use crate::context::Principal;
use crate::entitlement::EntitlementCache;
use crate::error::{Error, Result};
use crate::permission::{Action, PermissionCode};
use crate::policy::{PolicyEngine, PolicyRequest, RbacPolicyEngine};
use crate::route::RouteMatcher;
use crate::scope::{DataScope, greater_scope};
use crate::store::{EntitlementSource, PermissionSource, PolicySource, TokenStore};
use crate::token::{SessionClaims, TokenService, TokenServiceBuilder};
use crate::types::TenantId;
use std::collections::HashSet;
use std::sync::Arc;

/// Operations that bypass authentication and authorization.
#[derive(Debug, Clone, Default)]
pub struct PublicPaths {
    exact: HashSet<String>,
    prefixes: Vec<String>,
}

impl PublicPaths {
    /// Builds the set; entries ending in `/` match as prefixes.
    pub fn new<I, T>(paths: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut public = Self::default();
        for path in paths {
            let path = path.into();
            if path.ends_with('/') {
                public.prefixes.push(path);
            } else {
                public.exact.insert(path);
            }
        }
        public
    }

    /// Returns true if `operation` skips the pipeline.
    pub fn is_public(&self, operation: &str) -> bool {
        self.exact.contains(operation)
            || self
                .prefixes
                .iter()
                .any(|prefix| operation.starts_with(prefix.as_str()))
    }
}

/// Successful authorization of one request.
#[derive(Debug, Clone)]
pub struct Grant {
    /// Caller identity with the resolved tenant and data scope.
    pub principal: Principal,
    /// Validated token claims.
    pub claims: SessionClaims,
    /// Codes guarding the operation.
    pub codes: Vec<PermissionCode>,
}

/// Pipeline outcome for a request that may proceed.
#[derive(Debug, Clone)]
pub enum Admission {
    /// Public operation; no principal is attached.
    Public,
    /// Authenticated and authorized.
    Granted(Grant),
}

impl Admission {
    /// Returns the principal for granted requests.
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Admission::Public => None,
            Admission::Granted(grant) => Some(&grant.principal),
        }
    }
}

/// Ordered authorization chain run for every request.
///
/// Stages: public check, token validation, tenant resolution, permission
/// code resolution, package entitlement (multi-tenant only), policy.
pub struct RequestPipeline<S, P = RbacPolicyEngine> {
    tokens: Arc<TokenService<S>>,
    routes: Arc<RouteMatcher>,
    entitlements: Arc<EntitlementCache>,
    policy: Arc<P>,
    public: PublicPaths,
    multi_tenant: bool,
    fold_scopes: bool,
}

impl<S, P> std::fmt::Debug for RequestPipeline<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("public", &self.public)
            .field("multi_tenant", &self.multi_tenant)
            .field("fold_scopes", &self.fold_scopes)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RequestPipeline`].
pub struct RequestPipelineBuilder<S, P = RbacPolicyEngine> {
    tokens: Arc<TokenService<S>>,
    routes: Arc<RouteMatcher>,
    entitlements: Arc<EntitlementCache>,
    policy: Arc<P>,
    public: PublicPaths,
    multi_tenant: bool,
    fold_scopes: bool,
}

impl<S, P> RequestPipelineBuilder<S, P> {
    /// Creates a single-tenant, short-circuiting pipeline builder.
    pub fn new(
        tokens: Arc<TokenService<S>>,
        routes: Arc<RouteMatcher>,
        entitlements: Arc<EntitlementCache>,
        policy: Arc<P>,
    ) -> Self {
        Self {
            tokens,
            routes,
            entitlements,
            policy,
            public: PublicPaths::default(),
            multi_tenant: false,
            fold_scopes: false,
        }
    }

    /// Enables tenant claims and package entitlement checks.
    pub fn multi_tenant(mut self, on: bool) -> Self {
        self.multi_tenant = on;
        self
    }

    /// Evaluates every code and keeps the broadest granted scope.
    pub fn fold_scopes(mut self, on: bool) -> Self {
        self.fold_scopes = on;
        self
    }

    /// Sets the public operations.
    pub fn public_paths(mut self, public: PublicPaths) -> Self {
        self.public = public;
        self
    }

    /// Builds the pipeline.
    pub fn build(self) -> RequestPipeline<S, P> {
        RequestPipeline {
            tokens: self.tokens,
            routes: self.routes,
            entitlements: self.entitlements,
            policy: self.policy,
            public: self.public,
            multi_tenant: self.multi_tenant,
            fold_scopes: self.fold_scopes,
        }
    }
}

impl<S> RequestPipeline<S, RbacPolicyEngine>
where
    S: TokenStore,
{
    /// Builds the token service and loads every cache from `source`.
    ///
    /// Any initial load failure is returned as [`Error::InitialLoad`]; the
    /// application must not serve requests in that case.
    pub async fn bootstrap<Src>(config: &GuardConfig, store: S, source: &Src) -> Result<Self>
    where
        Src: PermissionSource + EntitlementSource + PolicySource + ?Sized,
    {
        config.validate()?;
        let tokens = TokenServiceBuilder::new(store, config.token.secret.as_bytes())
            .ttl(config.token.ttl())
            .leeway(config.token.leeway())
            .build()?;
        let routes = RouteMatcher::load_from(source).await?;
        let entitlements = EntitlementCache::load_from(source).await?;
        let policy = RbacPolicyEngine::load_from(source).await?;

        tracing::info!(
            multi_tenant = config.multi_tenant,
            fold_scopes = config.fold_scopes,
            "request pipeline ready"
        );
        Ok(RequestPipelineBuilder::new(
            Arc::new(tokens),
            Arc::new(routes),
            Arc::new(entitlements),
            Arc::new(policy),
        )
        .multi_tenant(config.multi_tenant)
        .fold_scopes(config.fold_scopes)
        .public_paths(PublicPaths::new(config.public_paths.iter().cloned()))
        .build())
    }

    /// Reloads the three caches independently.
    ///
    /// Every cache is attempted; a cache whose reload fails keeps its
    /// previous snapshot and the first error is returned.
    pub async fn reload<Src>(&self, source: &Src) -> Result<()>
    where
        Src: PermissionSource + EntitlementSource + PolicySource + ?Sized,
    {
        let routes = self.routes.reload(source).await.map(drop);
        let entitlements = self.entitlements.reload(source).await.map(drop);
        let policy = self.policy.reload(source).await.map(drop);
        routes.and(entitlements).and(policy)
    }
}

impl<S, P> RequestPipeline<S, P>
where
    S: TokenStore,
    P: PolicyEngine,
{
    /// Returns a builder.
    pub fn builder(
        tokens: Arc<TokenService<S>>,
        routes: Arc<RouteMatcher>,
        entitlements: Arc<EntitlementCache>,
        policy: Arc<P>,
    ) -> RequestPipelineBuilder<S, P> {
        RequestPipelineBuilder::new(tokens, routes, entitlements, policy)
    }

    /// Authenticates and authorizes one call to `operation`.
    ///
    /// `bearer` is the raw token without the `Bearer ` prefix.
    pub async fn authorize(&self, operation: &str, bearer: Option<&str>) -> Result<Admission> {
        if self.public.is_public(operation) {
            return Ok(Admission::Public);
        }

        let token = bearer
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::InvalidToken("missing bearer token".to_string()))?;
        let claims = self.tokens.validate(token).await?;

        let mut principal = Principal::from_claims(&claims)?;
        if !self.multi_tenant {
            principal = principal.with_tenant_id(TenantId::ROOT);
        }

        let codes = self.routes.resolve(operation);
        if codes.is_empty() {
            tracing::debug!(operation, "no permission codes defined");
            return Err(Error::RouteUndefined(operation.to_string()));
        }

        let tenant = principal.tenant_id();
        if self.multi_tenant && !self.entitlements.allows_any(tenant, &codes) {
            tracing::debug!(operation, tenant = %tenant, "operation outside tenant package");
            return Err(Error::PackageLimitExceeded {
                tenant,
                operation: operation.to_string(),
            });
        }

        let Some(scope) = self.evaluate(&principal, &codes) else {
            tracing::debug!(operation, user = %principal.user_id(), tenant = %tenant, "policy denied");
            return Err(Error::Forbidden {
                operation: operation.to_string(),
            });
        };

        Ok(Admission::Granted(Grant {
            principal: principal.with_data_scope(Some(scope)),
            claims,
            codes,
        }))
    }

    fn evaluate(&self, principal: &Principal, codes: &[PermissionCode]) -> Option<DataScope> {
        let action = Action::invoke();
        let mut granted = None;
        for code in codes {
            let decision = self.policy.enforce(&PolicyRequest {
                user: principal.user_id(),
                tenant: principal.tenant_id(),
                code,
                action: &action,
            });
            if let Some(scope) = decision.scope() {
                if !self.fold_scopes {
                    return Some(scope);
                }
                granted = Some(greater_scope(granted, scope));
            }
        }
        granted
    }

    /// Returns the token service.
    pub fn tokens(&self) -> &Arc<TokenService<S>> {
        &self.tokens
    }

    /// Returns the route matcher.
    pub fn routes(&self) -> &Arc<RouteMatcher> {
        &self.routes
    }

    /// Returns the tenant entitlement cache.
    pub fn entitlements(&self) -> &Arc<EntitlementCache> {
        &self.entitlements
    }

    /// Returns the policy engine.
    pub fn policy(&self) -> &Arc<P> {
        &self.policy
    }

    /// Returns true when requests keep the tenant from their token.
    pub fn is_multi_tenant(&self) -> bool {
        self.multi_tenant
    }
}
