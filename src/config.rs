//! Guard configuration loader (strict YAML).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level guard configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    /// Use the token tenant and check package entitlements.
    #[serde(default)]
    pub multi_tenant: bool,
    /// Operations that skip authentication; entries ending in `/` are prefixes.
    #[serde(default)]
    pub public_paths: Vec<String>,
    /// Evaluate every resolved code and keep the broadest granted scope.
    #[serde(default)]
    pub fold_scopes: bool,
    pub token: TokenConfig,
}

/// Session token settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    /// HMAC-SHA256 signing secret.
    pub secret: String,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default)]
    pub leeway_secs: u64,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("ttl_secs", &self.ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl TokenConfig {
    /// Session lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Clock skew tolerated on token expiry.
    pub fn leeway(&self) -> Duration {
        Duration::from_secs(self.leeway_secs)
    }
}

impl GuardConfig {
    /// Rejects values that parse but cannot be served.
    pub fn validate(&self) -> Result<()> {
        if self.token.secret.trim().is_empty() {
            return Err(Error::Config("token.secret must not be empty".to_string()));
        }
        if self.token.ttl_secs == 0 {
            return Err(Error::Config("token.ttl_secs must be > 0".to_string()));
        }
        if self.token.ttl_secs > i64::MAX as u64 || self.token.leeway_secs > i64::MAX as u64 {
            return Err(Error::Config(
                "token.ttl_secs and token.leeway_secs must fit in i64".to_string(),
            ));
        }
        if let Some(path) = self
            .public_paths
            .iter()
            .find(|path| !path.starts_with('/'))
        {
            return Err(Error::Config(format!(
                "public path {path:?} must start with '/'"
            )));
        }
        Ok(())
    }
}

/// Reads and validates a YAML config file.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<GuardConfig> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("read {} failed: {e}", path.display())))?;
    load_from_str(&s)
}

/// Parses and validates YAML config text; unknown keys are rejected.
pub fn load_from_str(s: &str) -> Result<GuardConfig> {
    let cfg: GuardConfig =
        serde_yaml::from_str(s).map_err(|e| Error::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
