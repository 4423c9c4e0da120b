//! Configuration Module
//!
//! Environment-driven configuration for the auth service: server, database,
//! tokens, shared store, rate limiting, verification codes, email and the
//! optional identity providers.

pub mod security;

use thiserror::Error;

use crate::database::DatabaseConfig;

// Re-export configuration types for convenient access
pub use security::{RateLimitingConfig, SecurityConfig, StoreErrorPolicy};

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {value} - {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Environment variable helpers
pub mod env {
    use std::env;
    use std::str::FromStr;

    use super::ConfigError;

    /// Get environment variable as string with default
    pub fn get_string(key: &str, default: &str) -> String {
        env::var(key).unwrap_or_else(|_| default.to_string())
    }

    /// Get environment variable as boolean with default
    pub fn get_bool(key: &str, default: bool) -> bool {
        get_parsed(key, default)
    }

    pub fn get_u16(key: &str, default: u16) -> u16 {
        get_parsed(key, default)
    }

    pub fn get_u32(key: &str, default: u32) -> u32 {
        get_parsed(key, default)
    }

    pub fn get_u64(key: &str, default: u64) -> u64 {
        get_parsed(key, default)
    }

    pub fn get_i64(key: &str, default: i64) -> i64 {
        get_parsed(key, default)
    }

    fn get_parsed<T: FromStr>(key: &str, default: T) -> T {
        env::var(key)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Check if environment variable is set to a non-empty value
    pub fn is_set(key: &str) -> bool {
        env::var(key).map(|v| !v.trim().is_empty()).unwrap_or(false)
    }

    /// Get a required environment variable
    pub fn get_required(key: &str) -> Result<String, ConfigError> {
        match env::var(key) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(ConfigError::MissingEnvVar(key.to_string())),
        }
    }

    /// Get an optional environment variable, treating empty as unset
    pub fn get_optional(key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Deployment environment, controls error detail exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Application configuration combining all service configurations
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub store: StoreConfig,
    pub security: SecurityConfig,
    pub verification: VerificationConfig,

    /// SMTP settings; codes are logged instead of mailed when absent
    pub email: Option<EmailConfig>,

    pub google: Option<GoogleOAuthConfig>,
    pub wechat: Option<WeChatConfig>,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub cors_origins: Vec<String>,
    pub request_timeout_seconds: u64,
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,

    /// Make refresh tokens single-use
    pub refresh_rotation: bool,
}

/// Shared key-value store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL; the in-memory store is used when unset
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub operation_timeout_ms: u64,
}

/// Verification code configuration
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub code_ttl_minutes: i64,
}

/// Email service configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_name: String,
    pub from_email: String,
}

/// Google OAuth specific configuration
#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// WeChat open platform credentials
#[derive(Debug, Clone)]
pub struct WeChatConfig {
    pub app_id: String,
    pub app_secret: String,
    pub request_timeout_seconds: u64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = match env::get_string("APP_ENV", "production").to_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            "production" | "prod" => Environment::Production,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "APP_ENV".to_string(),
                    value: other.to_string(),
                    reason: "Must be 'development' or 'production'".to_string(),
                })
            }
        };

        Ok(Self {
            host: env::get_string("SERVER_HOST", "0.0.0.0"),
            port: env::get_u16("SERVER_PORT", 3000),
            environment,
            cors_origins: env::get_string("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            request_timeout_seconds: env::get_u64("REQUEST_TIMEOUT_SECONDS", 30),
        })
    }
}

impl JwtConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            access_secret: env::get_required("JWT_ACCESS_SECRET")?,
            refresh_secret: env::get_required("JWT_REFRESH_SECRET")?,
            issuer: env::get_string("JWT_ISSUER", "auth-service"),
            refresh_rotation: env::get_bool("JWT_REFRESH_ROTATION", true),
        })
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: env::get_optional("REDIS_URL"),
            key_prefix: env::get_string("REDIS_KEY_PREFIX", "auth:"),
            operation_timeout_ms: env::get_u64("STORE_OPERATION_TIMEOUT_MS", 500),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            code_ttl_minutes: 10,
        }
    }
}

impl VerificationConfig {
    pub fn from_env() -> Self {
        Self {
            code_ttl_minutes: env::get_i64("VERIFICATION_CODE_TTL_MINUTES", 10),
        }
    }
}

impl EmailConfig {
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        if !env::is_set("SMTP_HOST") {
            return Ok(None);
        }

        Ok(Some(Self {
            smtp_host: env::get_required("SMTP_HOST")?,
            smtp_port: env::get_u16("SMTP_PORT", 587),
            smtp_username: env::get_required("SMTP_USERNAME")?,
            smtp_password: env::get_required("SMTP_PASSWORD")?,
            from_name: env::get_string("SMTP_FROM_NAME", "Auth Service"),
            from_email: env::get_required("SMTP_FROM_EMAIL")?,
        }))
    }
}

impl GoogleOAuthConfig {
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        if !env::is_set("GOOGLE_CLIENT_ID") {
            return Ok(None);
        }

        Ok(Some(Self {
            client_id: env::get_required("GOOGLE_CLIENT_ID")?,
            client_secret: env::get_required("GOOGLE_CLIENT_SECRET")?,
            redirect_uri: env::get_required("GOOGLE_REDIRECT_URI")?,
        }))
    }
}

impl WeChatConfig {
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        if !env::is_set("WECHAT_APP_ID") {
            return Ok(None);
        }

        Ok(Some(Self {
            app_id: env::get_required("WECHAT_APP_ID")?,
            app_secret: env::get_required("WECHAT_APP_SECRET")?,
            request_timeout_seconds: env::get_u64("WECHAT_TIMEOUT_SECONDS", 10),
        }))
    }
}

impl AppConfig {
    /// Load complete application configuration from environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            jwt: JwtConfig::from_env()?,
            store: StoreConfig::from_env(),
            security: SecurityConfig::from_env()?,
            verification: VerificationConfig::from_env(),
            email: EmailConfig::from_env()?,
            google: GoogleOAuthConfig::from_env()?,
            wechat: WeChatConfig::from_env()?,
        })
    }

    /// Validate the complete configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.security.validate()?;

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "Server port must be greater than 0".to_string(),
            ));
        }

        if self.server.request_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::ValidationError(
                "Database min_connections cannot be greater than max_connections".to_string(),
            ));
        }

        if self.jwt.access_secret.trim().is_empty() || self.jwt.refresh_secret.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "JWT secrets cannot be empty".to_string(),
            ));
        }

        if self.jwt.access_secret == self.jwt.refresh_secret {
            return Err(ConfigError::ValidationError(
                "JWT access and refresh secrets must be different".to_string(),
            ));
        }

        if self.store.operation_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Store operation timeout must be greater than 0".to_string(),
            ));
        }

        if self.verification.code_ttl_minutes <= 0 {
            return Err(ConfigError::ValidationError(
                "Verification code TTL must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
