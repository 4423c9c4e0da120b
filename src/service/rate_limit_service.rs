//! Rate Limiting Service
//!
//! Fixed-window counters over the shared [`CounterStore`], one window per
//! (action, identifier). Also hosts the pure identifier extraction strategies
//! used by the rate limit middleware.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StoreErrorPolicy;
use crate::store::{CounterStore, CounterWindow, StoreError};
use crate::utils::{
    error::AppError,
    validation::{is_email_identifier, normalize_email, normalize_phone},
};

/// Rate limiting specific errors
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Rate limit exceeded for {action}, retry after {retry_after}s")]
    Exceeded {
        action: RateLimitAction,
        retry_after: u64,
    },

    #[error("Rate limit store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Exceeded { retry_after, .. } => AppError::RateLimited { retry_after },
            RateLimitError::StoreUnavailable(msg) => AppError::ServiceUnavailable(msg),
        }
    }
}

impl From<StoreError> for RateLimitError {
    fn from(err: StoreError) -> Self {
        RateLimitError::StoreUnavailable(err.to_string())
    }
}

/// Result type for rate limiting operations
pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Abuse-prone flows guarded by a counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAction {
    Login,
    EmailSend,
    EmailVerify,
    PasswordResetSend,
    PasswordResetConfirm,
}

impl RateLimitAction {
    pub const ALL: [RateLimitAction; 5] = [
        RateLimitAction::Login,
        RateLimitAction::EmailSend,
        RateLimitAction::EmailVerify,
        RateLimitAction::PasswordResetSend,
        RateLimitAction::PasswordResetConfirm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAction::Login => "login",
            RateLimitAction::EmailSend => "email_send",
            RateLimitAction::EmailVerify => "email_verify",
            RateLimitAction::PasswordResetSend => "password_reset_send",
            RateLimitAction::PasswordResetConfirm => "password_reset_confirm",
        }
    }

    /// Request field that names the subject being throttled
    pub fn identifier_field(&self) -> &'static str {
        match self {
            RateLimitAction::Login => "account",
            _ => "email",
        }
    }

    /// Canonical form of an identifier, matching how the account is resolved
    ///
    /// Login accepts phones in any punctuation, so the separators are
    /// stripped before keying or every formatting would get its own window.
    pub fn normalize_identifier(&self, raw: &str) -> Option<String> {
        let normalized = match self {
            RateLimitAction::Login if !is_email_identifier(raw) => {
                normalize_phone(raw.trim()).to_lowercase()
            }
            _ => normalize_email(raw),
        };
        (!normalized.is_empty()).then_some(normalized)
    }

    /// Identifier found in the request for this action, normalized
    pub fn identifier(&self, query: Option<&str>, body: &[u8]) -> Option<String> {
        extract_identifier(self.identifier_field(), query, body)
            .and_then(|raw| self.normalize_identifier(&raw))
    }
}

impl std::fmt::Display for RateLimitAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cap and window for one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_attempts: u64,
    pub window_seconds: u64,
}

impl RateLimit {
    pub fn new(max_attempts: u64, window_seconds: u64) -> Self {
        Self {
            max_attempts,
            window_seconds,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Per-action limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub login: RateLimit,
    pub email_send: RateLimit,
    pub email_verify: RateLimit,
    pub password_reset_send: RateLimit,
    pub password_reset_confirm: RateLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: RateLimit::new(10, 900),
            email_send: RateLimit::new(3, 600),
            email_verify: RateLimit::new(5, 900),
            password_reset_send: RateLimit::new(3, 600),
            password_reset_confirm: RateLimit::new(5, 900),
        }
    }
}

impl RateLimitConfig {
    pub fn get(&self, action: RateLimitAction) -> RateLimit {
        match action {
            RateLimitAction::Login => self.login,
            RateLimitAction::EmailSend => self.email_send,
            RateLimitAction::EmailVerify => self.email_verify,
            RateLimitAction::PasswordResetSend => self.password_reset_send,
            RateLimitAction::PasswordResetConfirm => self.password_reset_confirm,
        }
    }

    pub fn set(&mut self, action: RateLimitAction, limit: RateLimit) {
        match action {
            RateLimitAction::Login => self.login = limit,
            RateLimitAction::EmailSend => self.email_send = limit,
            RateLimitAction::EmailVerify => self.email_verify = limit,
            RateLimitAction::PasswordResetSend => self.password_reset_send = limit,
            RateLimitAction::PasswordResetConfirm => self.password_reset_confirm = limit,
        }
    }
}

/// Counter state after a check or increment
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub action: RateLimitAction,
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
    pub window_seconds: u64,

    /// Seconds until the current window closes
    pub reset_after: u64,
}

impl RateLimitStatus {
    fn from_window(action: RateLimitAction, limit: RateLimit, window: CounterWindow) -> Self {
        Self {
            action,
            count: window.count,
            limit: limit.max_attempts,
            remaining: limit.max_attempts.saturating_sub(window.count),
            window_seconds: limit.window_seconds,
            reset_after: clamp_retry_after(window.ttl, limit),
        }
    }

    fn fresh(action: RateLimitAction, limit: RateLimit) -> Self {
        Self {
            action,
            count: 0,
            limit: limit.max_attempts,
            remaining: limit.max_attempts,
            window_seconds: limit.window_seconds,
            reset_after: limit.window_seconds,
        }
    }
}

/// Outcome of [`RateLimiter::check_and_record`] for an admitted request
#[derive(Debug, Clone)]
pub enum RateLimitDecision {
    Allowed(RateLimitStatus),

    /// Limiting disabled, or the store failed under the allow policy
    Bypassed,
}

fn clamp_retry_after(ttl: Duration, limit: RateLimit) -> u64 {
    ttl.as_secs().clamp(1, limit.window_seconds.max(1))
}

/// Fixed-window rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
    config: RateLimitConfig,
    enabled: bool,
    on_store_error: StoreErrorPolicy,
    operation_timeout: Duration,
    trust_forwarded_for: bool,
}

impl RateLimiter {
    pub fn new(counters: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self {
            counters,
            config,
            enabled: true,
            on_store_error: StoreErrorPolicy::Allow,
            operation_timeout: Duration::from_millis(500),
            trust_forwarded_for: false,
        }
    }

    /// Honor `X-Forwarded-For` when falling back to the client address
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Address used when a request carries no identifier
    pub fn fallback_identifier(&self, headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
        client_ip(headers, remote, self.trust_forwarded_for)
    }

    pub fn with_policy(mut self, policy: StoreErrorPolicy) -> Self {
        self.on_store_error = policy;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn limit_for(&self, action: RateLimitAction) -> RateLimit {
        self.config.get(action)
    }

    fn key(action: RateLimitAction, identifier: &str) -> String {
        format!("rate_limit:{}:{}", action, identifier)
    }

    async fn bounded<T, F>(&self, operation: F) -> RateLimitResult<T>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.operation_timeout, operation).await {
            Ok(result) => result.map_err(RateLimitError::from),
            Err(_) => Err(RateLimitError::StoreUnavailable(format!(
                "store operation timed out after {}ms",
                self.operation_timeout.as_millis()
            ))),
        }
    }

    /// Reads the current window without counting this request
    pub async fn check(
        &self,
        action: RateLimitAction,
        identifier: &str,
    ) -> RateLimitResult<RateLimitStatus> {
        let limit = self.config.get(action);
        let key = Self::key(action, identifier);

        let status = match self.bounded(self.counters.peek(&key)).await? {
            Some(window) => RateLimitStatus::from_window(action, limit, window),
            None => RateLimitStatus::fresh(action, limit),
        };

        if status.count >= limit.max_attempts {
            return Err(RateLimitError::Exceeded {
                action,
                retry_after: status.reset_after,
            });
        }

        Ok(status)
    }

    /// Counts one request against the window
    pub async fn record(
        &self,
        action: RateLimitAction,
        identifier: &str,
    ) -> RateLimitResult<RateLimitStatus> {
        let limit = self.config.get(action);
        let window = self
            .bounded(self.counters.increment(&Self::key(action, identifier), limit.window()))
            .await?;

        Ok(RateLimitStatus::from_window(action, limit, window))
    }

    /// Counts the request and rejects it once the window is over its cap
    ///
    /// Store failures follow the configured [`StoreErrorPolicy`].
    pub async fn check_and_record(
        &self,
        action: RateLimitAction,
        identifier: &str,
    ) -> RateLimitResult<RateLimitDecision> {
        if !self.enabled {
            return Ok(RateLimitDecision::Bypassed);
        }

        let status = match self.record(action, identifier).await {
            Ok(status) => status,
            Err(RateLimitError::StoreUnavailable(reason)) => {
                return match self.on_store_error {
                    StoreErrorPolicy::Allow => {
                        log::warn!(
                            "Rate limit store failed for {}; allowing request: {}",
                            action,
                            reason
                        );
                        Ok(RateLimitDecision::Bypassed)
                    }
                    StoreErrorPolicy::Deny => {
                        log::error!(
                            "Rate limit store failed for {}; denying request: {}",
                            action,
                            reason
                        );
                        Err(RateLimitError::StoreUnavailable(reason))
                    }
                };
            }
            Err(e) => return Err(e),
        };

        if status.count > status.limit {
            log::warn!("Rate limit exceeded for {} ({} requests)", action, status.count);
            return Err(RateLimitError::Exceeded {
                action,
                retry_after: status.reset_after,
            });
        }

        Ok(RateLimitDecision::Allowed(status))
    }

    /// Clears the window, e.g. after an administrative unlock
    pub async fn reset(&self, action: RateLimitAction, identifier: &str) -> RateLimitResult<()> {
        self.bounded(self.counters.reset(&Self::key(action, identifier)))
            .await
    }
}

/// Where to look for the identifier field of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierStrategy {
    JsonBody,
    Query,
    Form,
}

impl IdentifierStrategy {
    /// Lookup order used by the middleware
    pub const ORDERED: [IdentifierStrategy; 3] = [
        IdentifierStrategy::JsonBody,
        IdentifierStrategy::Query,
        IdentifierStrategy::Form,
    ];

    pub fn extract(&self, field: &str, query: Option<&str>, body: &[u8]) -> Option<String> {
        let raw = match self {
            IdentifierStrategy::JsonBody => serde_json::from_slice::<serde_json::Value>(body)
                .ok()
                .and_then(|value| value.get(field).and_then(|v| v.as_str()).map(str::to_string)),
            IdentifierStrategy::Query => query.and_then(|q| form_field(q.as_bytes(), field)),
            IdentifierStrategy::Form => form_field(body, field),
        }?;

        let normalized = raw.trim().to_lowercase();
        (!normalized.is_empty()).then_some(normalized)
    }
}

fn form_field(encoded: &[u8], field: &str) -> Option<String> {
    url::form_urlencoded::parse(encoded)
        .find(|(key, _)| key == field)
        .map(|(_, value)| value.into_owned())
}

/// First non-empty identifier found by the ordered strategies
pub fn extract_identifier(field: &str, query: Option<&str>, body: &[u8]) -> Option<String> {
    IdentifierStrategy::ORDERED
        .iter()
        .find_map(|strategy| strategy.extract(field, query, body))
}

/// Client address: the socket peer, or the first `X-Forwarded-For` hop when
/// the deployment sits behind a proxy that sets it
pub fn client_ip(
    headers: &HeaderMap,
    remote: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> String {
    let forwarded = trust_forwarded_for
        .then(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|hop| !hop.is_empty())
                .map(str::to_string)
        })
        .flatten();

    forwarded
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
