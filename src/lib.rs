//! Multi-tenant request authorization core.
//!
//! Every inbound call runs through a [`RequestPipeline`]: the bearer session
//! token is validated by the [`TokenService`] (signature, then a second
//! check against the [`TokenStore`]), the tenant is resolved, the operation
//! is mapped to permission codes by the [`RouteMatcher`], multi-tenant
//! deployments check the tenant package in the [`EntitlementCache`], and a
//! [`PolicyEngine`] decides the call and the [`DataScope`] of rows the
//! caller may see. Downstream data access turns the resulting
//! [`Principal`] into a [`RowFilter`]. The default behavior is deny.
//!
//! # Examples
//!
//! Bootstrapping a pipeline from the in-memory source (enable `memory-store`):
//! ```no_run
//! # #[cfg(feature = "memory-store")]
//! # futures::executor::block_on(async {
//! use rs_tenant_guard::{
//!     DataScope, MemorySource, MemoryTokenStore, PermissionCode, RequestPipeline, RoleCode,
//!     TenantId, UserId, config,
//! };
//! let source = MemorySource::new();
//! let read = PermissionCode::try_from("order:read").unwrap();
//! source.add_route_permission("/api/orders/:id", vec![read.clone()]);
//! source.assign_role(UserId::new(7), RoleCode::try_from("clerk").unwrap(), TenantId::ROOT);
//! source.grant_role_permission(
//!     RoleCode::try_from("clerk").unwrap(),
//!     TenantId::ROOT,
//!     read,
//!     DataScope::Dept,
//! );
//!
//! let cfg = config::load_from_str("token:\n  secret: change-me\n").unwrap();
//! let pipeline = RequestPipeline::bootstrap(&cfg, MemoryTokenStore::new(), &source)
//!     .await
//!     .unwrap();
//! let token = pipeline
//!     .tokens()
//!     .issue(UserId::new(7), Default::default(), TenantId::ROOT)
//!     .await
//!     .unwrap();
//! let admission = pipeline.authorize("/api/orders/5", Some(&token)).await.unwrap();
//! assert_eq!(
//!     admission.principal().and_then(|p| p.data_scope()),
//!     Some(DataScope::Dept)
//! );
//! # });
//! ```
#![forbid(unsafe_code)]

mod cache;
mod context;
mod entitlement;
mod error;
mod ids;
mod permission;
mod pipeline;
mod policy;
mod route;
mod scope;
mod store;
mod token;
mod types;

pub mod config;

#[cfg(feature = "memory-store")]
mod memory_store;

#[cfg(feature = "axum")]
pub mod axum;

pub use crate::config::{GuardConfig, TokenConfig};
pub use crate::context::Principal;
pub use crate::entitlement::EntitlementCache;
pub use crate::error::{Error, ReasonCode, Result, StoreError};
pub use crate::ids::{IdGenerator, SequenceIds, TokenIdGenerator, UuidTokenIds};
pub use crate::permission::{Action, PermissionCode};
pub use crate::pipeline::{Admission, Grant, PublicPaths, RequestPipeline, RequestPipelineBuilder};
pub use crate::policy::{Decision, PolicyEngine, PolicyLoadReport, PolicyRequest, RbacPolicyEngine};
pub use crate::route::{RouteLoadReport, RouteMatcher};
pub use crate::scope::{
    AuthFields, DataScope, RecordStamp, RowAttributes, RowFilter, RowFilterColumns,
    ScopePredicate, SqlFragment, SqlValue, greater_scope, parse_ancestors,
};
pub use crate::store::{
    EntitlementSource, GroupingFact, PermissionFact, PermissionRule, PermissionSource,
    PolicySource, TokenStore,
};
pub use crate::token::{
    Clock, DEFAULT_TTL, SessionClaims, SessionToken, SystemClock, TokenService,
    TokenServiceBuilder,
};
pub use crate::types::{DeptId, RoleCode, TenantId, TokenId, UserId};

#[cfg(feature = "memory-store")]
pub use crate::memory_store::{MemorySource, MemoryTokenStore};
