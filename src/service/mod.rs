//! Service Layer
//!
//! Business logic of the auth service: identity resolution, token lifecycle,
//! verification codes, rate limiting and the flows composed from them.

pub mod auth_service;
pub mod email_service;
pub mod identity;
pub mod oauth_service;
pub mod rate_limit_service;
pub mod token;
pub mod verification;

// Re-export services
pub use auth_service::AuthService;
pub use email_service::{EmailSender, LogEmailSender, SmtpEmailSender};
pub use identity::IdentityResolver;
pub use oauth_service::{GoogleOAuthClient, OAuthProviderClient, WeChatOAuthClient};
pub use rate_limit_service::{RateLimitAction, RateLimiter};
pub use token::TokenService;
pub use verification::VerificationCodeService;
