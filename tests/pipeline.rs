#![cfg(feature = "memory-store")]

use futures::executor::block_on;
use rs_tenant_guard::{
    Admission, DataScope, DeptId, Error, GuardConfig, MemorySource, MemoryTokenStore,
    PermissionCode, ReasonCode, RequestPipeline, RoleCode, RowFilter, RowFilterColumns, SqlValue,
    TenantId, UserId, config,
};

fn code(value: &str) -> PermissionCode {
    PermissionCode::try_from(value).unwrap()
}

fn role(value: &str) -> RoleCode {
    RoleCode::try_from(value).unwrap()
}

fn guard_config(multi_tenant: bool, fold_scopes: bool) -> GuardConfig {
    let yaml = format!(
        "multi_tenant: {multi_tenant}\nfold_scopes: {fold_scopes}\npublic_paths: [/api/auth/login, /api/public/]\ntoken:\n  secret: integration-secret\n  ttl_secs: 600\n"
    );
    config::load_from_str(&yaml).unwrap()
}

fn pipeline(
    source: &MemorySource,
    multi_tenant: bool,
    fold_scopes: bool,
) -> RequestPipeline<MemoryTokenStore> {
    block_on(RequestPipeline::bootstrap(
        &guard_config(multi_tenant, fold_scopes),
        MemoryTokenStore::new(),
        source,
    ))
    .unwrap()
}

fn login(pipeline: &RequestPipeline<MemoryTokenStore>, user: i64, tenant: i64) -> String {
    block_on(
        pipeline
            .tokens()
            .issue(UserId::new(user), DeptId::new(5), TenantId::new(tenant)),
    )
    .unwrap()
}

fn granted_scope(admission: Admission) -> Option<DataScope> {
    match admission {
        Admission::Granted(grant) => grant.principal.data_scope(),
        Admission::Public => None,
    }
}

fn orders_source() -> MemorySource {
    let source = MemorySource::new();
    source.add_route_permission("/api/orders/:id/items", vec![code("order:items:read")]);
    source.add_route_permission("/api/orders/:id", vec![code("order:read")]);
    source.grant_package(TenantId::new(42), code("order:read"));
    source.assign_role(UserId::new(7), role("clerk"), TenantId::new(42));
    source.grant_role_permission(role("clerk"), TenantId::new(42), code("order:read"), DataScope::Dept);
    source.grant_role_permission(
        role("clerk"),
        TenantId::new(42),
        code("order:items:read"),
        DataScope::All,
    );
    source
}

#[test]
fn package_limit_should_deny_despite_role_grant() {
    let source = orders_source();
    let pipeline = pipeline(&source, true, false);
    let token = login(&pipeline, 7, 42);

    let err = block_on(pipeline.authorize("/api/orders/9/items", Some(&token))).unwrap_err();
    assert!(matches!(err, Error::PackageLimitExceeded { tenant, .. } if tenant == TenantId::new(42)));
    assert_eq!(err.reason_code(), ReasonCode::PackageLimitExceeded);

    source.grant_package(TenantId::new(42), code("order:items:read"));
    block_on(pipeline.entitlements().reload(&source)).unwrap();

    let admission = block_on(pipeline.authorize("/api/orders/9/items", Some(&token))).unwrap();
    assert_eq!(granted_scope(admission), Some(DataScope::All));
}

#[test]
fn multi_tenant_grant_should_carry_token_tenant_and_scope() {
    let source = orders_source();
    let pipeline = pipeline(&source, true, false);
    let token = login(&pipeline, 7, 42);

    let admission = block_on(pipeline.authorize("/api/orders/9", Some(&token))).unwrap();
    let Admission::Granted(grant) = admission else {
        panic!("expected granted admission");
    };
    assert_eq!(grant.principal.user_id(), UserId::new(7));
    assert_eq!(grant.principal.tenant_id(), TenantId::new(42));
    assert_eq!(grant.principal.dept_id(), DeptId::new(5));
    assert_eq!(grant.principal.data_scope(), Some(DataScope::Dept));
    assert_eq!(grant.codes, vec![code("order:read")]);

    let filter = RowFilter::for_principal(&grant.principal);
    let fragment = filter.to_sql(&RowFilterColumns::default());
    assert_eq!(fragment.sql, "tenant_id = ? AND dept_id = ?");
    assert_eq!(fragment.params, vec![SqlValue::Int(42), SqlValue::Int(5)]);
}

#[test]
fn single_tenant_should_force_root_and_skip_packages() {
    let source = MemorySource::new();
    source.add_route_permission("/api/orders/:id/items", vec![code("order:items:read")]);
    source.assign_role(UserId::new(7), role("clerk"), TenantId::ROOT);
    source.grant_role_permission(
        role("clerk"),
        TenantId::ROOT,
        code("order:items:read"),
        DataScope::SelfOnly,
    );
    let pipeline = pipeline(&source, false, false);
    let token = login(&pipeline, 7, 42);

    let admission = block_on(pipeline.authorize("/api/orders/9/items", Some(&token))).unwrap();
    assert_eq!(admission.principal().map(|p| p.tenant_id()), Some(TenantId::ROOT));
    assert_eq!(granted_scope(admission), Some(DataScope::SelfOnly));
}

#[test]
fn public_paths_should_skip_authentication() {
    let pipeline = pipeline(&MemorySource::new(), true, false);

    assert!(matches!(
        block_on(pipeline.authorize("/api/auth/login", None)).unwrap(),
        Admission::Public
    ));
    assert!(matches!(
        block_on(pipeline.authorize("/api/public/docs", Some("garbage"))).unwrap(),
        Admission::Public
    ));
}

#[test]
fn missing_or_malformed_token_should_be_invalid() {
    let pipeline = pipeline(&orders_source(), true, false);

    for bearer in [None, Some(""), Some("not.a.token")] {
        let err = block_on(pipeline.authorize("/api/orders/9", bearer)).unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::InvalidToken);
    }
}

#[test]
fn unmapped_operation_should_be_route_undefined() {
    let pipeline = pipeline(&orders_source(), true, false);
    let token = login(&pipeline, 7, 42);

    let err = block_on(pipeline.authorize("/api/invoices/1", Some(&token))).unwrap_err();
    assert!(matches!(err, Error::RouteUndefined(_)));
    assert!(err.reason_code().is_denial());
}

#[test]
fn user_without_role_should_be_forbidden() {
    let pipeline = pipeline(&orders_source(), true, false);
    let token = login(&pipeline, 8, 42);

    let err = block_on(pipeline.authorize("/api/orders/9", Some(&token))).unwrap_err();
    assert!(matches!(err, Error::Forbidden { .. }));
}

#[test]
fn root_admin_should_pass_policy_in_any_entitled_tenant() {
    let source = orders_source();
    source.assign_role(UserId::new(1), RoleCode::admin(), TenantId::ROOT);
    let pipeline = pipeline(&source, true, false);
    let token = login(&pipeline, 1, 42);

    let admission = block_on(pipeline.authorize("/api/orders/9", Some(&token))).unwrap();
    assert_eq!(granted_scope(admission), Some(DataScope::All));

    let err = block_on(pipeline.authorize("/api/orders/9/items", Some(&token))).unwrap_err();
    assert!(matches!(err, Error::PackageLimitExceeded { .. }));
}

#[test]
fn revoked_sessions_should_be_token_expired() {
    let pipeline = pipeline(&orders_source(), true, false);
    let first = login(&pipeline, 7, 42);
    let second = login(&pipeline, 7, 42);

    let Admission::Granted(grant) =
        block_on(pipeline.authorize("/api/orders/9", Some(&first))).unwrap()
    else {
        panic!("expected granted admission");
    };
    block_on(pipeline.tokens().revoke(&grant.claims, None)).unwrap();

    let err = block_on(pipeline.authorize("/api/orders/9", Some(&first))).unwrap_err();
    assert_eq!(err.reason_code(), ReasonCode::TokenExpired);
    assert!(block_on(pipeline.authorize("/api/orders/9", Some(&second))).is_ok());

    block_on(pipeline.tokens().revoke_all(UserId::new(7))).unwrap();
    let err = block_on(pipeline.authorize("/api/orders/9", Some(&second))).unwrap_err();
    assert_eq!(err.reason_code(), ReasonCode::TokenExpired);
    assert!(pipeline.tokens().store().is_empty());
}

#[test]
fn flagged_revocation_should_be_token_expired() {
    let pipeline = pipeline(&orders_source(), true, false);
    let token = login(&pipeline, 7, 42);
    let records = block_on(pipeline.tokens().user_tokens(UserId::new(7))).unwrap();

    assert!(pipeline.tokens().store().mark_revoked(&records[0].id, "admin reset"));
    let err = block_on(pipeline.authorize("/api/orders/9", Some(&token))).unwrap_err();
    assert_eq!(err.reason_code(), ReasonCode::TokenExpired);
}

#[test]
fn scope_folding_should_pick_broadest_grant() {
    let source = MemorySource::new();
    source.add_route_permission(
        "/api/reports",
        vec![code("report:own"), code("report:all")],
    );
    source.assign_role(UserId::new(7), role("analyst"), TenantId::ROOT);
    source.grant_role_permission(role("analyst"), TenantId::ROOT, code("report:own"), DataScope::SelfOnly);
    source.grant_role_permission(role("analyst"), TenantId::ROOT, code("report:all"), DataScope::DeptSub);

    let first_match = pipeline(&source, false, false);
    let token = login(&first_match, 7, 1);
    let admission = block_on(first_match.authorize("/api/reports", Some(&token))).unwrap();
    assert_eq!(granted_scope(admission), Some(DataScope::SelfOnly));

    let folding = pipeline(&source, false, true);
    let token = login(&folding, 7, 1);
    let admission = block_on(folding.authorize("/api/reports", Some(&token))).unwrap();
    assert_eq!(granted_scope(admission), Some(DataScope::DeptSub));
}

#[test]
fn bootstrap_should_fail_when_source_is_unavailable() {
    let source = orders_source();
    source.set_unavailable(true);

    let result = block_on(RequestPipeline::bootstrap(
        &guard_config(true, false),
        MemoryTokenStore::new(),
        &source,
    ));
    assert!(matches!(result, Err(Error::InitialLoad { .. })));
}

#[test]
fn failed_reload_should_keep_serving_previous_data() {
    let source = orders_source();
    let pipeline = pipeline(&source, true, false);
    let token = login(&pipeline, 7, 42);

    source.set_unavailable(true);
    assert!(block_on(pipeline.reload(&source)).is_err());
    assert!(block_on(pipeline.authorize("/api/orders/9", Some(&token))).is_ok());

    source.set_unavailable(false);
    source.revoke_package(TenantId::new(42), &code("order:read"));
    block_on(pipeline.reload(&source)).unwrap();
    let err = block_on(pipeline.authorize("/api/orders/9", Some(&token))).unwrap_err();
    assert!(matches!(err, Error::PackageLimitExceeded { .. }));
}
