use crate::cache::SnapshotCell;
use crate::error::{Error, Result};
use crate::permission::{PermissionCode, dedup_codes};
use crate::store::{PermissionRule, PermissionSource};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

const PARAM_MARKER: char = ':';
const GLOB_MARKER: char = '*';
const SEGMENT_WILDCARD: &str = "[^/]+";
const MULTI_SEGMENT_WILDCARD: &str = ".*";

/// Compiled dynamic rule.
#[derive(Debug)]
struct DynamicRoute {
    raw: String,
    pattern: Regex,
    codes: Arc<[PermissionCode]>,
}

#[derive(Debug, Default)]
struct RouteIndex {
    exact: HashMap<String, Arc<[PermissionCode]>>,
    dynamic: Vec<DynamicRoute>,
}

/// Outcome of a successful (re)load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteLoadReport {
    /// Literal paths indexed.
    pub exact: usize,
    /// Dynamic templates compiled.
    pub dynamic: usize,
    /// Templates dropped because they could not be compiled.
    pub rejected: Vec<String>,
}

/// Resolves API operations to the permission codes guarding them.
#[derive(Debug, Default)]
pub struct RouteMatcher {
    index: SnapshotCell<RouteIndex>,
}

impl RouteMatcher {
    /// Creates an empty matcher; every operation resolves to no codes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a matcher from `source`.
    ///
    /// A failing source is returned as [`Error::InitialLoad`]; callers must
    /// not serve requests without a populated matcher.
    pub async fn load_from<P>(source: &P) -> Result<Self>
    where
        P: PermissionSource + ?Sized,
    {
        let rules = source
            .load_route_permissions()
            .await
            .map_err(|source| Error::InitialLoad {
                cache: "route permission",
                source,
            })?;
        let matcher = Self::new();
        matcher.install(rules);
        Ok(matcher)
    }

    /// Rebuilds the index from `source` and swaps it in.
    ///
    /// On failure the current index keeps serving and the error is returned.
    pub async fn reload<P>(&self, source: &P) -> Result<RouteLoadReport>
    where
        P: PermissionSource + ?Sized,
    {
        match source.load_route_permissions().await {
            Ok(rules) => Ok(self.install(rules)),
            Err(err) => {
                tracing::error!(error = %err, "route permission reload failed; keeping previous index");
                Err(Error::Store(err))
            }
        }
    }

    /// Builds an index from `rules` off to the side and installs it.
    pub fn install(&self, rules: Vec<PermissionRule>) -> RouteLoadReport {
        let (index, report) = build_index(rules);
        self.index.replace(index);
        tracing::info!(
            exact = report.exact,
            dynamic = report.dynamic,
            rejected = report.rejected.len(),
            "route permissions loaded"
        );
        report
    }

    /// Returns the codes guarding `path`, or an empty list if none are defined.
    ///
    /// Literal paths win over templates; templates are tried longest first.
    pub fn resolve(&self, path: &str) -> Vec<PermissionCode> {
        let index = self.index.load();
        if let Some(codes) = index.exact.get(path) {
            return codes.to_vec();
        }
        index
            .dynamic
            .iter()
            .find(|route| route.pattern.is_match(path))
            .map(|route| route.codes.to_vec())
            .unwrap_or_default()
    }

    /// Returns the dynamic templates in match order.
    pub fn dynamic_templates(&self) -> Vec<String> {
        self.index
            .load()
            .dynamic
            .iter()
            .map(|route| route.raw.clone())
            .collect()
    }
}

fn build_index(rules: Vec<PermissionRule>) -> (RouteIndex, RouteLoadReport) {
    let mut exact = HashMap::new();
    let mut dynamic = Vec::new();
    let mut rejected = Vec::new();

    for rule in rules {
        let codes: Arc<[PermissionCode]> = dedup_codes(rule.codes).into();
        if !is_dynamic(&rule.path) {
            exact.insert(rule.path, codes);
            continue;
        }
        match compile_template(&rule.path) {
            Ok(pattern) => dynamic.push(DynamicRoute {
                raw: rule.path,
                pattern,
                codes,
            }),
            Err(err) => {
                tracing::warn!(path = %rule.path, error = %err, "dropping route permission rule");
                rejected.push(rule.path);
            }
        }
    }

    // Stable: equal lengths keep load order.
    dynamic.sort_by(|a, b| b.raw.len().cmp(&a.raw.len()));

    let report = RouteLoadReport {
        exact: exact.len(),
        dynamic: dynamic.len(),
        rejected,
    };
    (RouteIndex { exact, dynamic }, report)
}

fn is_dynamic(path: &str) -> bool {
    path.contains(PARAM_MARKER) || path.contains(GLOB_MARKER)
}

fn is_param_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Converts a template such as `/api/users/:id/roles/*` into an anchored regex.
///
/// `:name` matches exactly one path segment and `*` matches any remainder.
/// A parameter name is `[A-Za-z0-9_]+`; every other character, including
/// text directly after a name (`:name.json`), is matched literally.
pub(crate) fn compile_template(template: &str) -> Result<Regex> {
    let mut pattern = String::with_capacity(template.len() + 16);
    pattern.push('^');

    let mut literal = String::new();
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            PARAM_MARKER => {
                let mut name_len = 0;
                while chars.next_if(|next| is_param_name_char(*next)).is_some() {
                    name_len += 1;
                }
                if name_len == 0 {
                    return Err(Error::InvalidRoutePattern {
                        path: template.to_string(),
                        reason: "parameter marker without a name".to_string(),
                    });
                }
                pattern.push_str(&regex::escape(&literal));
                literal.clear();
                pattern.push_str(SEGMENT_WILDCARD);
            }
            GLOB_MARKER => {
                pattern.push_str(&regex::escape(&literal));
                literal.clear();
                pattern.push_str(MULTI_SEGMENT_WILDCARD);
            }
            other => literal.push(other),
        }
    }
    pattern.push_str(&regex::escape(&literal));
    pattern.push('$');

    Regex::new(&pattern).map_err(|err| Error::InvalidRoutePattern {
        path: template.to_string(),
        reason: err.to_string(),
    })
}
