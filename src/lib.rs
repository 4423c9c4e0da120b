//! Auth Service Library
//!
//! Identity federation and token lifecycle for end users signing in with a
//! password, a WeChat Mini-Program, WeChat OAuth or Google OAuth.
//!
//! # Features
//!
//! - **One account per person**: every credential proof resolves to exactly one
//!   local user; provider identities are linked, never merged by email
//! - **JWT tokens**: HS256 access tokens (1 hour) and single-use refresh tokens
//!   (7 days) signed with distinct secrets
//! - **Verification codes**: six-digit, single-use codes for email confirmation
//!   and password reset
//! - **Rate limiting**: fixed-window counters in a shared store with a
//!   configurable fail-open or fail-closed policy
//! - **Flexible Router**: route groups selected through [`RouterBuilder`]
//!
//! # As a Web Server Library
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use auth_service::{
//!     api::{AppState, RouterBuilder},
//!     service::{
//!         rate_limit_service::RateLimitConfig, AuthService, IdentityResolver, LogEmailSender,
//!         RateLimiter, TokenService, VerificationCodeService,
//!     },
//!     store::{MemoryKvStore, MemoryUserStore},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let users = Arc::new(MemoryUserStore::new());
//!     let kv = Arc::new(MemoryKvStore::new());
//!
//!     let tokens = TokenService::new(
//!         users.clone(),
//!         "access_secret".to_string(),
//!         "refresh_secret".to_string(),
//!         "auth-service".to_string(),
//!     )
//!     .with_replay_guard(kv.clone());
//!     let codes = VerificationCodeService::new(kv.clone(), Arc::new(LogEmailSender));
//!     let auth = AuthService::new(users.clone(), IdentityResolver::new(users), tokens, codes);
//!
//!     let state = AppState {
//!         auth: Arc::new(auth),
//!         rate_limiter: Arc::new(RateLimiter::new(kv, RateLimitConfig::default())),
//!     };
//!
//!     // Password sign-in only
//!     let app = RouterBuilder::with_minimal_routes()
//!         .password_auth(true)
//!         .refresh_token(true)
//!         .build(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **API Layer**: handlers, bearer auth and rate-limit middleware, routing
//! - **Service Layer**: identity resolution, tokens, codes, rate limits and the
//!   orchestrating [`service::AuthService`]
//! - **Store**: traits over Postgres (users, identities) and Redis (counters,
//!   codes, replay markers), with in-memory implementations
//! - **Models**: data structures and request/response payloads
//! - **Utils**: error handling, hashing and validation

/// HTTP API layer with handlers and configurable routing
pub mod api;

/// Configuration management for all service settings
pub mod config;

/// Database connection management and configuration
pub mod database;

/// Data models and request/response structures
pub mod models;

/// Authentication business logic
pub mod service;

/// Persistence seams and their implementations
pub mod store;

/// Shared utilities for security, validation, and error handling
pub mod utils;

// Re-export commonly used types for convenient access
pub use api::{create_routes, AppState, RouterBuilder};
pub use models::{
    auth::{TokenPair, UserContext},
    identity::{Provider, ProviderIdentity},
    user::User,
};
pub use service::AuthService;
pub use utils::error::{AppError, AppResult, ErrorResponse};

// Re-export database utilities for configuration
pub use database::{DatabaseConfig, DatabasePool};

// Re-export configuration system
pub use config::{env, AppConfig};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
