use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

const MAX_NAME_LEN: usize = 128;

fn validate_simple_name(value: &str, kind: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidId(format!("{kind} must not be empty")));
    }
    if trimmed.len() > MAX_NAME_LEN {
        return Err(Error::InvalidId(format!(
            "{kind} length must be <= {MAX_NAME_LEN}"
        )));
    }
    if !trimmed.chars().all(is_allowed_name_char) {
        return Err(Error::InvalidId(format!(
            "{kind} contains invalid characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn is_allowed_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, ':' | '_' | '-')
}

macro_rules! define_numeric_id {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[derive(Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw identifier.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw identifier.
            pub const fn get(self) -> i64 {
                self.0
            }

            /// Returns true for the zero value used when the id is absent.
            pub const fn is_unset(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(value: &str) -> Result<Self> {
                value
                    .trim()
                    .parse::<i64>()
                    .map(Self)
                    .map_err(|err| Error::InvalidId(format!("{} {value:?}: {err}", $kind)))
            }
        }
    };
}

macro_rules! define_name_type {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a validated identifier.
            pub fn new(value: impl AsRef<str>) -> Result<Self> {
                validate_simple_name(value.as_ref(), $kind).map(Self)
            }

            /// Creates an identifier from a trusted string without validation.
            pub fn from_string(value: String) -> Self {
                Self(value)
            }

            /// Returns the underlying string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(value: &str) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::from_string(value)
            }
        }
    };
}

define_numeric_id!(
    /// Tenant identifier.
    TenantId,
    "tenant id"
);
define_numeric_id!(
    /// User identifier; the subject of a session token.
    UserId,
    "user id"
);
define_numeric_id!(
    /// Department identifier.
    DeptId,
    "dept id"
);

define_name_type!(
    /// Role code, e.g. `admin` or `order_clerk`.
    RoleCode,
    "role code"
);
define_name_type!(
    /// Unique session token identifier (`jti`).
    TokenId,
    "token id"
);

impl TenantId {
    /// Root tenant: the default tenant in single-tenant mode, the system
    /// tenant in multi-tenant mode.
    pub const ROOT: TenantId = TenantId(1);

    /// Returns true for the root tenant.
    pub const fn is_root(self) -> bool {
        self.0 == Self::ROOT.0
    }
}

impl RoleCode {
    /// Role code whose grant in the root tenant bypasses policy matching.
    pub const ADMIN: &'static str = "admin";

    /// Returns the distinguished admin role.
    pub fn admin() -> Self {
        Self(Self::ADMIN.to_string())
    }

    /// Returns true for the admin role.
    pub fn is_admin(&self) -> bool {
        self.0 == Self::ADMIN
    }
}
