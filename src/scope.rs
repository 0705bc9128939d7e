//! Row-visibility scopes and the row filters derived from them.

use crate::context::Principal;
use crate::error::{Error, Result};
use crate::ids::IdGenerator;
use crate::types::{DeptId, TenantId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Row-visibility level attached to a granted permission.
///
/// Ordered by permissiveness: `SelfOnly < Dept < DeptSub < All`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataScope {
    /// Rows created by the caller.
    #[serde(rename = "SELF")]
    SelfOnly,
    /// Rows of the caller's department.
    #[serde(rename = "DEPT")]
    Dept,
    /// Rows of the caller's department and its descendants.
    #[serde(rename = "DEPT_SUB")]
    DeptSub,
    /// Every row of the tenant.
    #[serde(rename = "ALL")]
    All,
}

impl DataScope {
    /// Every scope, least permissive first.
    pub const ALL_SCOPES: [DataScope; 4] = [
        DataScope::SelfOnly,
        DataScope::Dept,
        DataScope::DeptSub,
        DataScope::All,
    ];

    /// Stored string form.
    pub fn as_str(self) -> &'static str {
        match self {
            DataScope::SelfOnly => "SELF",
            DataScope::Dept => "DEPT",
            DataScope::DeptSub => "DEPT_SUB",
            DataScope::All => "ALL",
        }
    }

    /// Priority rank: `ALL(4) > DEPT_SUB(3) > DEPT(2) > SELF(1)`.
    pub fn priority(self) -> u8 {
        match self {
            DataScope::SelfOnly => 1,
            DataScope::Dept => 2,
            DataScope::DeptSub => 3,
            DataScope::All => 4,
        }
    }

    /// Returns the more permissive of two scopes.
    pub fn greater(self, other: DataScope) -> DataScope {
        if other.priority() > self.priority() {
            other
        } else {
            self
        }
    }
}

/// Folds an optional running scope with a newly granted one.
pub fn greater_scope(current: Option<DataScope>, granted: DataScope) -> DataScope {
    match current {
        Some(current) => current.greater(granted),
        None => granted,
    }
}

impl fmt::Display for DataScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataScope {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "SELF" => Ok(DataScope::SelfOnly),
            "DEPT" => Ok(DataScope::Dept),
            "DEPT_SUB" => Ok(DataScope::DeptSub),
            "ALL" => Ok(DataScope::All),
            other => Err(Error::InvalidScope(other.to_string())),
        }
    }
}

/// Scope-specific part of a row filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopePredicate {
    /// No restriction beyond tenant isolation.
    Unrestricted,
    /// Department equals the given one or descends from it.
    DeptTree(DeptId),
    /// Department equals the given one.
    Dept(DeptId),
    /// Creator equals the given user.
    Creator(UserId),
    /// Matches nothing.
    Nothing,
}

/// Attributes of a stored row relevant to visibility.
#[derive(Debug, Clone, Copy)]
pub struct RowAttributes<'a> {
    /// Owning tenant.
    pub tenant: TenantId,
    /// Owning department.
    pub dept: DeptId,
    /// Ancestors of the owning department, root first.
    pub dept_ancestors: &'a [DeptId],
    /// Creating user.
    pub created_by: UserId,
}

/// Column and table names used when rendering a filter to SQL.
#[derive(Debug, Clone)]
pub struct RowFilterColumns {
    pub tenant: &'static str,
    pub dept: &'static str,
    pub creator: &'static str,
    pub dept_table: &'static str,
    pub dept_table_id: &'static str,
    pub dept_table_ancestors: &'static str,
}

impl Default for RowFilterColumns {
    fn default() -> Self {
        Self {
            tenant: "tenant_id",
            dept: "dept_id",
            creator: "created_by",
            dept_table: "sys_dept",
            dept_table_id: "id",
            dept_table_ancestors: "ancestors",
        }
    }
}

/// Bound parameter of a rendered filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Int(i64),
    Text(String),
}

/// Parameterised `WHERE` fragment using `?` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Tenant isolation plus scope predicate for data-access code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowFilter {
    /// Tenant every row must belong to, whatever the scope.
    pub tenant: TenantId,
    /// Scope restriction applied after tenant isolation.
    pub predicate: ScopePredicate,
}

impl RowFilter {
    /// Builds the filter for a principal; a missing scope matches nothing.
    pub fn for_principal(principal: &Principal) -> Self {
        let predicate = match principal.data_scope() {
            Some(DataScope::All) => ScopePredicate::Unrestricted,
            Some(DataScope::DeptSub) => ScopePredicate::DeptTree(principal.dept_id()),
            Some(DataScope::Dept) => ScopePredicate::Dept(principal.dept_id()),
            Some(DataScope::SelfOnly) => ScopePredicate::Creator(principal.user_id()),
            None => ScopePredicate::Nothing,
        };
        Self {
            tenant: principal.tenant_id(),
            predicate,
        }
    }

    /// Builds the filter from a raw scope string; unknown strings match nothing.
    pub fn from_raw_scope(principal: &Principal, scope: &str) -> Self {
        let scope = scope.parse::<DataScope>().ok();
        Self::for_principal(&principal.clone().with_data_scope(scope))
    }

    /// Evaluates the filter against one row.
    pub fn matches(&self, row: &RowAttributes<'_>) -> bool {
        if row.tenant != self.tenant {
            return false;
        }
        match self.predicate {
            ScopePredicate::Unrestricted => true,
            ScopePredicate::DeptTree(dept) => {
                row.dept == dept || row.dept_ancestors.contains(&dept)
            }
            ScopePredicate::Dept(dept) => row.dept == dept,
            ScopePredicate::Creator(user) => row.created_by == user,
            ScopePredicate::Nothing => false,
        }
    }

    /// Renders the filter as a SQL fragment.
    pub fn to_sql(&self, columns: &RowFilterColumns) -> SqlFragment {
        let mut sql = format!("{} = ?", columns.tenant);
        let mut params = vec![SqlValue::Int(self.tenant.get())];
        match self.predicate {
            ScopePredicate::Unrestricted => {}
            ScopePredicate::DeptTree(dept) => {
                sql.push_str(&format!(
                    " AND {dept_col} IN (SELECT {id} FROM {table} WHERE {id} = ? OR (',' || {anc} || ',') LIKE ?)",
                    dept_col = columns.dept,
                    id = columns.dept_table_id,
                    table = columns.dept_table,
                    anc = columns.dept_table_ancestors,
                ));
                params.push(SqlValue::Int(dept.get()));
                params.push(SqlValue::Text(format!("%,{dept},%")));
            }
            ScopePredicate::Dept(dept) => {
                sql.push_str(&format!(" AND {} = ?", columns.dept));
                params.push(SqlValue::Int(dept.get()));
            }
            ScopePredicate::Creator(user) => {
                sql.push_str(&format!(" AND {} = ?", columns.creator));
                params.push(SqlValue::Int(user.get()));
            }
            ScopePredicate::Nothing => sql.push_str(" AND 1 = 0"),
        }
        SqlFragment { sql, params }
    }
}

/// Parses a comma-separated ancestor path such as `0,1,5`.
pub fn parse_ancestors(path: &str) -> Result<Vec<DeptId>> {
    path.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::parse)
        .collect()
}

/// Ownership columns carried by tenant-scoped rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthFields {
    pub tenant_id: TenantId,
    pub created_by: UserId,
    pub dept_id: DeptId,
}

impl AuthFields {
    /// Fills unset fields from the principal; explicit values are kept.
    pub fn fill_missing(&mut self, principal: &Principal) {
        if self.created_by.is_unset() {
            self.created_by = principal.user_id();
        }
        if self.tenant_id.is_unset() {
            self.tenant_id = principal.tenant_id();
        }
        if self.dept_id.is_unset() {
            self.dept_id = principal.dept_id();
        }
    }
}

/// Identity and ownership of a row about to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordStamp {
    pub id: i64,
    pub auth: AuthFields,
}

impl RecordStamp {
    /// Draws a new id from `ids` and stamps ownership from `principal`.
    pub fn issue(ids: &dyn IdGenerator, principal: &Principal) -> Result<Self> {
        let id = ids.next_id()?;
        let mut auth = AuthFields::default();
        auth.fill_missing(principal);
        Ok(Self { id, auth })
    }
}
