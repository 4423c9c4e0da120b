//! Token Issuer
//!
//! Mints HS256 access and refresh tokens, validates access tokens and exchanges
//! refresh tokens for new pairs. Refresh tokens are single-use when a
//! [`ReplayGuard`] is attached.

use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::models::auth::{TokenClaims, TokenKind, TokenPair, UserContext};
use crate::models::user::AccountStatus;
use crate::store::{ReplayGuard, StoreError, UserStore};
use crate::utils::error::AppError;

/// Access token lifetime
pub const ACCESS_TOKEN_TTL_SECS: i64 = 60 * 60;

/// Refresh token lifetime
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Allowed clock skew on `exp` and `iat`, in both directions
pub const CLOCK_SKEW_LEEWAY_SECS: i64 = 5;

/// Token errors
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Wrong token type")]
    WrongKind,

    #[error("Refresh token already used")]
    Replayed,

    #[error("Account unavailable")]
    AccountUnavailable,

    #[error("Token generation failed: {0}")]
    Encoding(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid(_) | TokenError::WrongKind | TokenError::Replayed => {
                AppError::InvalidOrExpiredToken
            }
            TokenError::AccountUnavailable => AppError::AccountUnavailable,
            TokenError::Encoding(msg) => AppError::Internal(msg),
            TokenError::Store(e) => e.into(),
        }
    }
}

pub type TokenResult<T> = Result<T, TokenError>;

/// JWT issuing and validation service
#[derive(Clone)]
pub struct TokenService {
    users: Arc<dyn UserStore>,

    /// Claims refresh `jti`s; rotation is off when absent
    replay_guard: Option<Arc<dyn ReplayGuard>>,

    access_secret: String,
    refresh_secret: String,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(
        users: Arc<dyn UserStore>,
        access_secret: String,
        refresh_secret: String,
        issuer: String,
    ) -> Self {
        Self {
            users,
            replay_guard: None,
            access_secret,
            refresh_secret,
            issuer,
            access_ttl: Duration::seconds(ACCESS_TOKEN_TTL_SECS),
            refresh_ttl: Duration::seconds(REFRESH_TOKEN_TTL_SECS),
        }
    }

    /// Make refresh tokens single-use
    pub fn with_replay_guard(mut self, guard: Arc<dyn ReplayGuard>) -> Self {
        self.replay_guard = Some(guard);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_lifetimes(mut self, access: Duration, refresh: Duration) -> Self {
        self.access_ttl = access;
        self.refresh_ttl = refresh;
        self
    }

    /// Mint a fresh access and refresh token pair
    pub fn issue(&self, user_id: i64) -> TokenResult<TokenPair> {
        let now = Utc::now();

        let access_claims = TokenClaims::new(
            user_id,
            TokenKind::Access,
            &self.issuer,
            now,
            now + self.access_ttl,
        );
        let refresh_claims = TokenClaims::new(
            user_id,
            TokenKind::Refresh,
            &self.issuer,
            now,
            now + self.refresh_ttl,
        );

        Ok(TokenPair::new(
            self.encode(&access_claims, &self.access_secret)?,
            self.encode(&refresh_claims, &self.refresh_secret)?,
            self.access_ttl.num_seconds(),
        ))
    }

    /// Validate an access token by signature and claims alone
    pub fn validate_access_token(&self, token: &str) -> TokenResult<UserContext> {
        let claims = self.decode(token, TokenKind::Access)?;
        UserContext::from_access_claims(&claims)
            .ok_or_else(|| TokenError::Invalid("Invalid user ID in token".into()))
    }

    /// Exchange a refresh token for a new pair
    pub async fn refresh(&self, refresh_token: &str) -> TokenResult<TokenPair> {
        let claims = self.decode(refresh_token, TokenKind::Refresh)?;
        let user_id = claims
            .user_id()
            .ok_or_else(|| TokenError::Invalid("Invalid user ID in token".into()))?;

        let available = self
            .users
            .find_by_id(user_id)
            .await?
            .map(|record| record.status() == AccountStatus::Active)
            .unwrap_or(false);
        if !available {
            return Err(TokenError::AccountUnavailable);
        }

        if let Some(guard) = &self.replay_guard {
            let remaining = (claims.exp - Utc::now().timestamp()).max(0) + CLOCK_SKEW_LEEWAY_SECS;
            let key = format!("refresh_jti:{}", claims.jti);
            let first_use = guard
                .claim(&key, std::time::Duration::from_secs(remaining as u64))
                .await?;
            if !first_use {
                log::warn!(
                    "Refresh token replay detected for user {} (jti {})",
                    user_id,
                    claims.jti
                );
                return Err(TokenError::Replayed);
            }
        }

        self.issue(user_id)
    }

    fn encode(&self, claims: &TokenClaims, secret: &str) -> TokenResult<String> {
        let header = Header::new(Algorithm::HS256);
        let encoding_key = EncodingKey::from_secret(secret.as_ref());

        encode(&header, claims, &encoding_key).map_err(|e| TokenError::Encoding(e.to_string()))
    }

    fn decode(&self, token: &str, kind: TokenKind) -> TokenResult<TokenClaims> {
        let secret = match kind {
            TokenKind::Access => &self.access_secret,
            TokenKind::Refresh => &self.refresh_secret,
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = CLOCK_SKEW_LEEWAY_SECS as u64;
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        let decoding_key = DecodingKey::from_secret(secret.as_ref());
        let claims = decode::<TokenClaims>(token, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;

        if claims.token_type != kind {
            return Err(TokenError::WrongKind);
        }

        // jsonwebtoken does not check iat
        if claims.iat > Utc::now().timestamp() + CLOCK_SKEW_LEEWAY_SECS {
            return Err(TokenError::Invalid("Token issued in the future".into()));
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::NewUser;
    use crate::store::{MemoryKvStore, MemoryUserStore};

    async fn setup() -> (TokenService, Arc<MemoryUserStore>, i64) {
        let users = Arc::new(MemoryUserStore::new());
        let user = users
            .create_user(NewUser {
                email: Some("token@example.com".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let service = TokenService::new(
            users.clone(),
            "test_access_secret_key".to_string(),
            "test_refresh_secret_key".to_string(),
            "auth-service".to_string(),
        )
        .with_replay_guard(Arc::new(MemoryKvStore::new()));
        (service, users, user.id)
    }

    #[tokio::test]
    async fn test_access_token_round_trip() {
        let (service, _, user_id) = setup().await;
        let pair = service.issue(user_id).unwrap();

        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, ACCESS_TOKEN_TTL_SECS);

        let context = service.validate_access_token(&pair.access_token).unwrap();
        assert_eq!(context.user_id, user_id);
    }

    #[tokio::test]
    async fn test_refresh_token_rejected_as_access_token() {
        let (service, _, user_id) = setup().await;
        let pair = service.issue(user_id).unwrap();

        // Different secret, so the signature check fails first
        assert!(service.validate_access_token(&pair.refresh_token).is_err());
        assert!(matches!(
            service.refresh(&pair.access_token).await,
            Err(TokenError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_type_claim_rejected() {
        let (service, _, user_id) = setup().await;
        let now = Utc::now();
        let claims = TokenClaims::new(
            user_id,
            TokenKind::Refresh,
            "auth-service",
            now,
            now + Duration::hours(1),
        );
        // Refresh-typed claims signed with the access secret
        let token = service.encode(&claims, "test_access_secret_key").unwrap();

        assert!(matches!(
            service.validate_access_token(&token),
            Err(TokenError::WrongKind)
        ));
    }

    #[tokio::test]
    async fn test_refresh_issues_distinct_pair_and_rejects_replay() {
        let (service, _, user_id) = setup().await;
        let pair = service.issue(user_id).unwrap();

        let refreshed = service.refresh(&pair.refresh_token).await.unwrap();
        assert_ne!(refreshed.refresh_token, pair.refresh_token);
        assert_ne!(refreshed.access_token, pair.access_token);

        let replay = service.refresh(&pair.refresh_token).await;
        assert!(matches!(replay, Err(TokenError::Replayed)));
    }

    #[tokio::test]
    async fn test_refresh_without_rotation_allows_reuse() {
        let (service, _, user_id) = setup().await;
        let service = TokenService {
            replay_guard: None,
            ..service
        };
        let pair = service.issue(user_id).unwrap();

        assert!(service.refresh(&pair.refresh_token).await.is_ok());
        assert!(service.refresh(&pair.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_for_banned_user_fails() {
        let (service, users, user_id) = setup().await;
        let pair = service.issue(user_id).unwrap();

        users.set_banned(user_id, true).await.unwrap();

        let result = service.refresh(&pair.refresh_token).await;
        assert!(matches!(result, Err(TokenError::AccountUnavailable)));
    }

    #[tokio::test]
    async fn test_refresh_for_soft_deleted_user_fails() {
        let (service, users, user_id) = setup().await;
        let pair = service.issue(user_id).unwrap();

        users.set_deleted(user_id, true).await.unwrap();
        let result = service.refresh(&pair.refresh_token).await;
        assert!(matches!(result, Err(TokenError::AccountUnavailable)));

        // The rejected attempt does not spend the token
        users.set_deleted(user_id, false).await.unwrap();
        assert!(service.refresh(&pair.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_token_rejected_beyond_leeway() {
        let (service, _, user_id) = setup().await;
        let service = service.with_lifetimes(Duration::seconds(-30), Duration::seconds(-30));
        let pair = service.issue(user_id).unwrap();

        assert!(service.validate_access_token(&pair.access_token).is_err());
        assert!(service.refresh(&pair.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn test_expiry_within_leeway_accepted() {
        let (service, _, user_id) = setup().await;
        let service = service.with_lifetimes(Duration::seconds(-2), Duration::days(7));
        let pair = service.issue(user_id).unwrap();

        assert!(service.validate_access_token(&pair.access_token).is_ok());
    }

    #[tokio::test]
    async fn test_future_issued_token_rejected() {
        let (service, _, user_id) = setup().await;
        let future = Utc::now() + Duration::minutes(5);
        let claims = TokenClaims::new(
            user_id,
            TokenKind::Access,
            "auth-service",
            future,
            future + Duration::hours(1),
        );
        let token = service.encode(&claims, "test_access_secret_key").unwrap();

        assert!(service.validate_access_token(&token).is_err());
    }
}
