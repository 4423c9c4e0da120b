//! Security Configuration
//!
//! Rate limiting policy and password hashing cost.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{env, ConfigError};
use crate::service::rate_limit_service::{RateLimit, RateLimitAction, RateLimitConfig};
use crate::utils::security::DEFAULT_BCRYPT_COST;

/// Security configuration for the auth service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub rate_limiting: RateLimitingConfig,

    /// bcrypt work factor for new password hashes
    pub bcrypt_cost: u32,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Whether rate limiting is enabled
    pub enabled: bool,

    /// What to do when the counter store cannot answer
    pub on_store_error: StoreErrorPolicy,

    /// Per-action caps and windows
    pub limits: RateLimitConfig,

    /// Key IP fallbacks on the first `X-Forwarded-For` hop; only safe when a
    /// trusted proxy overwrites that header
    pub trust_forwarded_for: bool,
}

/// Behavior of the rate limiter when the shared store fails or times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreErrorPolicy {
    /// Log a warning and let the request through
    Allow,
    /// Reject with 503
    Deny,
}

impl FromStr for StoreErrorPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "allow" => Ok(StoreErrorPolicy::Allow),
            "deny" => Ok(StoreErrorPolicy::Deny),
            other => Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_ON_STORE_ERROR".to_string(),
                value: other.to_string(),
                reason: "Must be 'allow' or 'deny'".to_string(),
            }),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limiting: RateLimitingConfig::default(),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            on_store_error: StoreErrorPolicy::Allow,
            limits: RateLimitConfig::default(),
            trust_forwarded_for: false,
        }
    }
}

impl SecurityConfig {
    /// Load security configuration from environment variables
    ///
    /// Per-action overrides use `RATE_LIMIT_<ACTION>_MAX` and
    /// `RATE_LIMIT_<ACTION>_WINDOW` (seconds).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.rate_limiting.enabled = env::get_bool("RATE_LIMIT_ENABLED", true);
        config.rate_limiting.trust_forwarded_for = env::get_bool("TRUST_FORWARDED_FOR", false);

        if let Some(policy) = env::get_optional("RATE_LIMIT_ON_STORE_ERROR") {
            config.rate_limiting.on_store_error = policy.parse()?;
        }

        for action in RateLimitAction::ALL {
            let prefix = format!("RATE_LIMIT_{}", action.as_str().to_uppercase());
            let current = config.rate_limiting.limits.get(action);
            let overridden = RateLimit::new(
                env::get_u64(&format!("{}_MAX", prefix), current.max_attempts),
                env::get_u64(&format!("{}_WINDOW", prefix), current.window_seconds),
            );
            config.rate_limiting.limits.set(action, overridden);
        }

        config.bcrypt_cost = env::get_u32("BCRYPT_COST", DEFAULT_BCRYPT_COST);

        config.validate()?;

        Ok(config)
    }

    /// Validate the security configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limiting.enabled {
            for action in RateLimitAction::ALL {
                let limit = self.rate_limiting.limits.get(action);
                if limit.max_attempts == 0 {
                    return Err(ConfigError::ValidationError(format!(
                        "Rate limit max_attempts for {} must be greater than 0",
                        action
                    )));
                }
                if limit.window_seconds == 0 {
                    return Err(ConfigError::ValidationError(format!(
                        "Rate limit window for {} must be greater than 0",
                        action
                    )));
                }
            }
        }

        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::ValidationError(
                "bcrypt cost must be between 4 and 31".to_string(),
            ));
        }

        Ok(())
    }
}
