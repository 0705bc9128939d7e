use crate::error::{Error, Result};
use crate::ids::{TokenIdGenerator, UuidTokenIds};
use crate::store::TokenStore;
use crate::types::{DeptId, TenantId, TokenId, UserId};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default session lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Persisted record of one issued session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    /// Store key, equal to the `jti` claim.
    pub id: TokenId,
    /// Owner of the session.
    pub user_id: UserId,
    /// Department at issue time.
    pub dept_id: DeptId,
    /// Tenant at issue time.
    pub tenant_id: TenantId,
    /// Unix seconds.
    pub issued_at: i64,
    /// Unix seconds.
    pub expires_at: i64,
    /// The signed token handed to the client.
    pub signed_value: String,
    /// Set when the session was revoked without deleting the record.
    pub revoked: bool,
    /// Why the session was revoked, if recorded.
    pub revoke_reason: Option<String>,
}

impl SessionToken {
    /// Returns true when the record no longer authenticates requests at `now`.
    pub fn is_inactive(&self, now: i64) -> bool {
        self.revoked || self.expires_at <= now
    }
}

/// Claims carried inside a signed session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: decimal user id.
    pub sub: String,
    /// Token identifier, the store key.
    pub jti: TokenId,
    pub iat: i64,
    pub exp: i64,
    pub dept_id: DeptId,
    pub tenant_id: TenantId,
}

impl SessionClaims {
    /// Parses the subject as a user id.
    pub fn user_id(&self) -> Result<UserId> {
        self.sub
            .parse()
            .map_err(|_| Error::InvalidToken(format!("non-numeric subject {:?}", self.sub)))
    }

    /// Tenant the session was issued for.
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Department the session was issued for.
    pub fn dept_id(&self) -> DeptId {
        self.dept_id
    }

    /// Store key of the session.
    pub fn token_id(&self) -> &TokenId {
        &self.jti
    }
}

/// Source of the current time in Unix seconds.
pub trait Clock: Send + Sync {
    /// Current Unix time in seconds.
    fn now_epoch_seconds(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default()
    }
}

/// Issues, validates and revokes bearer session tokens.
///
/// Tokens are HS256-signed and self-contained, but every validation also
/// looks the token up in the [`TokenStore`], so deleting the stored record
/// revokes it immediately.
pub struct TokenService<S> {
    store: S,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
    leeway_secs: i64,
    ids: Arc<dyn TokenIdGenerator>,
    clock: Arc<dyn Clock>,
}

impl<S> fmt::Debug for TokenService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl_secs", &self.ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TokenService`].
pub struct TokenServiceBuilder<S> {
    store: S,
    secret: Vec<u8>,
    ttl: Duration,
    leeway: Duration,
    ids: Arc<dyn TokenIdGenerator>,
    clock: Arc<dyn Clock>,
}

impl<S> TokenServiceBuilder<S>
where
    S: TokenStore,
{
    /// Creates a builder with the default lifetime, the system clock and UUIDv4 ids.
    pub fn new(store: S, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            store,
            secret: secret.into(),
            ttl: DEFAULT_TTL,
            leeway: Duration::ZERO,
            ids: Arc::new(UuidTokenIds),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the session lifetime.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the tolerance applied to the claim expiry.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Sets the token identifier generator.
    pub fn id_generator(mut self, ids: Arc<dyn TokenIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Sets the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the service.
    pub fn build(self) -> Result<TokenService<S>> {
        if self.secret.is_empty() {
            return Err(Error::Config("token secret must not be empty".to_string()));
        }
        if self.ttl.is_zero() {
            return Err(Error::Config("token ttl must be positive".to_string()));
        }
        let ttl_secs = i64::try_from(self.ttl.as_secs())
            .map_err(|_| Error::Config("token ttl is out of range".to_string()))?;
        let leeway_secs = i64::try_from(self.leeway.as_secs())
            .map_err(|_| Error::Config("token leeway is out of range".to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock instead.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(TokenService {
            store: self.store,
            encoding: EncodingKey::from_secret(&self.secret),
            decoding: DecodingKey::from_secret(&self.secret),
            validation,
            ttl_secs,
            leeway_secs,
            ids: self.ids,
            clock: self.clock,
        })
    }
}

impl<S> TokenService<S>
where
    S: TokenStore,
{
    /// Returns a builder.
    pub fn builder(store: S, secret: impl Into<Vec<u8>>) -> TokenServiceBuilder<S> {
        TokenServiceBuilder::new(store, secret)
    }

    /// Returns the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Signs a new session token and persists its record.
    ///
    /// Nothing is returned unless both signing and persistence succeed.
    pub async fn issue(&self, user: UserId, dept: DeptId, tenant: TenantId) -> Result<String> {
        let id = self.ids.next_token_id();
        let issued_at = self.clock.now_epoch_seconds();
        let expires_at = issued_at.saturating_add(self.ttl_secs);
        let claims = SessionClaims {
            sub: user.to_string(),
            jti: id.clone(),
            iat: issued_at,
            exp: expires_at,
            dept_id: dept,
            tenant_id: tenant,
        };

        let signed = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(Error::TokenSigning)?;

        let record = SessionToken {
            id: id.clone(),
            user_id: user,
            dept_id: dept,
            tenant_id: tenant,
            issued_at,
            expires_at,
            signed_value: signed.clone(),
            revoked: false,
            revoke_reason: None,
        };
        self.store
            .save_token(record)
            .await
            .map_err(Error::TokenPersistence)?;

        tracing::debug!(user = %user, tenant = %tenant, token_id = %id, "session token issued");
        Ok(signed)
    }

    /// Verifies `token` and confirms it is still live in the store.
    pub async fn validate(&self, token: &str) -> Result<SessionClaims> {
        let claims = decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map_err(|err| {
                tracing::debug!(error = %err, "token rejected");
                Error::InvalidToken(err.to_string())
            })?
            .claims;
        let user = claims.user_id()?;

        let now = self.clock.now_epoch_seconds();
        if claims.exp.saturating_add(self.leeway_secs) <= now {
            tracing::debug!(token_id = %claims.jti, "token claim expired");
            return Err(Error::TokenExpired);
        }

        let record = self.store.get_token(&claims.jti).await?;
        match record {
            Some(record) if record.user_id == user && !record.is_inactive(now) => Ok(claims),
            Some(_) => {
                tracing::debug!(token_id = %claims.jti, "stored token expired or revoked");
                Err(Error::TokenExpired)
            }
            None => {
                tracing::debug!(token_id = %claims.jti, "token not found in store");
                Err(Error::TokenExpired)
            }
        }
    }

    /// Deletes one token of the current subject.
    ///
    /// Without `token_id` the token presented with `current` is revoked.
    pub async fn revoke(&self, current: &SessionClaims, token_id: Option<&TokenId>) -> Result<()> {
        let user = current.user_id()?;
        let id = token_id.unwrap_or(&current.jti);
        self.store.delete_user_token(user, id).await?;
        tracing::info!(user = %user, token_id = %id, "session token revoked");
        Ok(())
    }

    /// Deletes every token of `user`.
    pub async fn revoke_all(&self, user: UserId) -> Result<()> {
        self.store.delete_user_tokens(user).await?;
        tracing::info!(user = %user, "all session tokens revoked");
        Ok(())
    }

    /// Lists persisted sessions of `user`.
    pub async fn user_tokens(&self, user: UserId) -> Result<Vec<SessionToken>> {
        Ok(self.store.user_tokens(user).await?)
    }
}
