//! API Layer
//!
//! HTTP endpoints, middleware and router assembly for the auth service.

pub mod handlers;
pub mod middleware;
pub mod oauth_handlers;
pub mod rate_limit_middleware;
pub mod routes;

// Re-export commonly used types
pub use handlers::{handle_panic, AppState};
pub use middleware::{auth_middleware, AuthUser};
pub use rate_limit_middleware::{rate_limit_middleware, RateLimitGuard};
pub use routes::{create_routes, RouterBuilder};
