use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

const MAX_CODE_LEN: usize = 128;

/// Opaque permission code guarding a capability, e.g. `order:items:read`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionCode(String);

impl PermissionCode {
    /// Parses and validates a permission code.
    ///
    /// Surrounding whitespace is trimmed; case is preserved because codes are
    /// compared byte for byte against loaded policy data.
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidPermission(
                "permission code must not be empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_CODE_LEN {
            return Err(Error::InvalidPermission(format!(
                "permission code length must be <= {MAX_CODE_LEN}"
            )));
        }
        if !trimmed.chars().all(is_allowed_code_char) {
            return Err(Error::InvalidPermission(
                "permission code contains invalid characters".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Creates a permission code from a trusted string without validation.
    pub fn from_string(value: String) -> Self {
        Self(value)
    }

    /// Returns the underlying string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_allowed_code_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, ':' | '_' | '-' | '.' | '*')
}

impl fmt::Display for PermissionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PermissionCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PermissionCode {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for PermissionCode {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<String> for PermissionCode {
    fn from(value: String) -> Self {
        Self::from_string(value)
    }
}

/// Action marker of a policy fact.
///
/// API permissions are loaded with the single marker [`Action::INVOKE`].
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    /// Marker carried by every API permission fact.
    pub const INVOKE: &'static str = "V";

    /// Returns the API invocation marker.
    pub fn invoke() -> Self {
        Self(Self::INVOKE.to_string())
    }

    /// Creates an action from a trusted string.
    pub fn from_string(value: String) -> Self {
        Self(value)
    }

    /// Returns the underlying string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Action {
    fn default() -> Self {
        Self::invoke()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Removes repeated codes while keeping first-seen order.
pub(crate) fn dedup_codes(codes: Vec<PermissionCode>) -> Vec<PermissionCode> {
    let mut seen = std::collections::HashSet::with_capacity(codes.len());
    codes
        .into_iter()
        .filter(|code| seen.insert(code.clone()))
        .collect()
}
