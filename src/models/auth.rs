//! Authentication Models
//!
//! Token pair, JWT claims and the authenticated user context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT token pair returned by every successful sign-in or refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Short-lived access token for API authentication
    pub access_token: String,

    /// Long-lived, single-use refresh token
    pub refresh_token: String,

    /// Token type (always "Bearer")
    pub token_type: String,

    /// Access token lifetime in seconds
    pub expires_in: i64,
}

impl TokenPair {
    pub fn new(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
        }
    }
}

/// Token kind carried in the `type` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT claims shared by access and refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - numeric user ID rendered as a string
    pub sub: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// JWT ID - unique token identifier, used for refresh replay detection
    pub jti: String,

    pub iss: String,

    #[serde(rename = "type")]
    pub token_type: TokenKind,
}

impl TokenClaims {
    pub fn new(
        user_id: i64,
        kind: TokenKind,
        issuer: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sub: user_id.to_string(),
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            iss: issuer.to_string(),
            token_type: kind,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

/// User context extracted from a validated access token
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: i64,

    /// Token ID for tracing
    pub token_id: String,

    pub expires_at: DateTime<Utc>,
}

impl UserContext {
    /// Returns `None` when the subject is not a numeric user ID
    pub fn from_access_claims(claims: &TokenClaims) -> Option<Self> {
        Some(Self {
            user_id: claims.user_id()?,
            token_id: claims.jti.clone(),
            expires_at: DateTime::from_timestamp(claims.exp, 0)?,
        })
    }
}
