use crate::types::TenantId;
use thiserror::Error;

/// Store-layer error type.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable reason attached to every failed authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    /// Token is malformed, unsigned or carries a wrong signature.
    InvalidToken,
    /// Token signature is valid but the session expired or was revoked.
    TokenExpired,
    /// Signing or persisting a new token failed.
    TokenGenerationError,
    /// Policy denied the call.
    Forbidden,
    /// No permission codes are mapped to the operation.
    RouteUndefined,
    /// Tenant package does not include the operation.
    PackageLimitExceeded,
    /// Internal failure (store, configuration, cache load).
    Internal,
}

impl ReasonCode {
    /// Stable string form used in responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::InvalidToken => "INVALID_TOKEN",
            ReasonCode::TokenExpired => "TOKEN_EXPIRED",
            ReasonCode::TokenGenerationError => "TOKEN_GENERATION_ERROR",
            ReasonCode::Forbidden => "FORBIDDEN",
            ReasonCode::RouteUndefined => "ROUTE_UNDEFINED",
            ReasonCode::PackageLimitExceeded => "PACKAGE_LIMIT_EXCEEDED",
            ReasonCode::Internal => "INTERNAL",
        }
    }

    /// Returns true for outcomes that are access denials rather than failures.
    pub fn is_denial(self) -> bool {
        !matches!(
            self,
            ReasonCode::TokenGenerationError | ReasonCode::Internal
        )
    }

    /// Returns true when the caller has to authenticate again.
    pub fn is_unauthenticated(self) -> bool {
        matches!(self, ReasonCode::InvalidToken | ReasonCode::TokenExpired)
    }
}

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Store error wrapper.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// Invalid identifier input.
    #[error("invalid id: {0}")]
    InvalidId(String),
    /// Invalid permission code input.
    #[error("invalid permission: {0}")]
    InvalidPermission(String),
    /// Data scope outside `SELF`, `DEPT`, `DEPT_SUB`, `ALL`.
    #[error("invalid data scope: {0:?}")]
    InvalidScope(String),
    /// Dynamic route template that cannot be compiled.
    #[error("invalid route pattern {path}: {reason}")]
    InvalidRoutePattern { path: String, reason: String },
    /// Configuration rejected at parse or validation time.
    #[error("invalid config: {0}")]
    Config(String),
    /// A cache could not be populated at startup.
    #[error("initial {cache} load failed: {source}")]
    InitialLoad {
        cache: &'static str,
        #[source]
        source: StoreError,
    },
    /// Malformed, unsigned or wrongly signed token.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// Token expired, revoked, or unknown to the token store.
    #[error("token expired or revoked")]
    TokenExpired,
    /// Signing a new token failed.
    #[error("token signing failed: {0}")]
    TokenSigning(#[source] jsonwebtoken::errors::Error),
    /// Persisting a new token failed.
    #[error("token persistence failed: {0}")]
    TokenPersistence(#[source] StoreError),
    /// Policy denied the operation.
    #[error("forbidden: {operation}")]
    Forbidden { operation: String },
    /// No permission codes are mapped to the operation.
    #[error("no permission codes defined for {0}")]
    RouteUndefined(String),
    /// Tenant package lacks every code guarding the operation.
    #[error("package of tenant {tenant} does not include {operation}")]
    PackageLimitExceeded { tenant: TenantId, operation: String },
}

impl Error {
    /// Maps the error to its stable reason code.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Error::InvalidToken(_) => ReasonCode::InvalidToken,
            Error::TokenExpired => ReasonCode::TokenExpired,
            Error::TokenSigning(_) | Error::TokenPersistence(_) => {
                ReasonCode::TokenGenerationError
            }
            Error::Forbidden { .. } => ReasonCode::Forbidden,
            Error::RouteUndefined(_) => ReasonCode::RouteUndefined,
            Error::PackageLimitExceeded { .. } => ReasonCode::PackageLimitExceeded,
            Error::Store(_)
            | Error::InvalidId(_)
            | Error::InvalidPermission(_)
            | Error::InvalidScope(_)
            | Error::InvalidRoutePattern { .. }
            | Error::Config(_)
            | Error::InitialLoad { .. } => ReasonCode::Internal,
        }
    }
}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_kinds_should_map_to_denial_codes() {
        let denials = vec![
            Error::InvalidToken("bad signature".to_string()),
            Error::TokenExpired,
            Error::Forbidden {
                operation: "/api/orders".to_string(),
            },
            Error::RouteUndefined("/api/unknown".to_string()),
            Error::PackageLimitExceeded {
                tenant: TenantId::new(42),
                operation: "/api/orders".to_string(),
            },
        ];

        for error in denials {
            assert!(error.reason_code().is_denial(), "{error}");
        }
    }

    #[test]
    fn generation_failures_should_share_reason_code() {
        let persist = Error::TokenPersistence("disk full".into());
        assert_eq!(persist.reason_code(), ReasonCode::TokenGenerationError);
        assert!(!persist.reason_code().is_denial());
        assert_eq!(persist.reason_code().as_str(), "TOKEN_GENERATION_ERROR");
    }

    #[test]
    fn only_token_errors_require_reauthentication() {
        assert!(ReasonCode::TokenExpired.is_unauthenticated());
        assert!(ReasonCode::InvalidToken.is_unauthenticated());
        assert!(!ReasonCode::Forbidden.is_unauthenticated());
        assert!(!ReasonCode::PackageLimitExceeded.is_unauthenticated());
    }
}
