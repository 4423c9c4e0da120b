//! API Route Definitions
//!
//! Routes are grouped by flow and assembled with [`RouterBuilder`], so a
//! deployment can expose only the sign-in methods it supports.

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, MethodRouter},
    Router,
};

use super::handlers::*;
use super::middleware::auth_middleware;
use super::oauth_handlers::*;
use super::rate_limit_middleware::{rate_limit_middleware, RateLimitGuard};
use crate::service::RateLimitAction;

/// Builder for creating API routes with configurable route groups
#[derive(Default)]
pub struct RouterBuilder {
    /// GET /health
    health_check: bool,
    /// POST /auth/register, POST /auth/login
    password_auth: bool,
    /// POST /auth/refresh
    refresh_token: bool,
    /// POST /auth/wechat/oauth, POST /auth/wechat/mp/{register,login}
    wechat: bool,
    /// POST /auth/google/oauth
    google: bool,
    /// POST/DELETE /auth/{wechat,google}/bind
    identity_binding: bool,
    /// POST /auth/email/{send,verify}
    email_verification: bool,
    /// POST /auth/password/reset/{send,confirm}
    password_reset: bool,
}

impl RouterBuilder {
    /// Creates a new router builder with all routes disabled
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_all_routes() -> Self {
        Self {
            health_check: true,
            password_auth: true,
            refresh_token: true,
            wechat: true,
            google: true,
            identity_binding: true,
            email_verification: true,
            password_reset: true,
        }
    }

    /// Health check only
    pub fn with_minimal_routes() -> Self {
        Self {
            health_check: true,
            ..Self::default()
        }
    }

    pub fn health_check(mut self, enabled: bool) -> Self {
        self.health_check = enabled;
        self
    }

    pub fn password_auth(mut self, enabled: bool) -> Self {
        self.password_auth = enabled;
        self
    }

    pub fn refresh_token(mut self, enabled: bool) -> Self {
        self.refresh_token = enabled;
        self
    }

    pub fn wechat(mut self, enabled: bool) -> Self {
        self.wechat = enabled;
        self
    }

    pub fn google(mut self, enabled: bool) -> Self {
        self.google = enabled;
        self
    }

    pub fn identity_binding(mut self, enabled: bool) -> Self {
        self.identity_binding = enabled;
        self
    }

    pub fn email_verification(mut self, enabled: bool) -> Self {
        self.email_verification = enabled;
        self
    }

    pub fn password_reset(mut self, enabled: bool) -> Self {
        self.password_reset = enabled;
        self
    }

    /// Builds the router with the selected routes and binds `state`
    pub fn build(self, state: AppState) -> Router {
        let limited = |route: MethodRouter<AppState>, action: RateLimitAction| {
            route.layer(from_fn_with_state(
                RateLimitGuard::new(state.rate_limiter.clone(), action),
                rate_limit_middleware,
            ))
        };

        let mut router = Router::new();

        if self.health_check {
            router = router.route("/health", get(health_check));
        }

        if self.password_auth {
            router = router
                .route("/auth/register", post(register))
                .route(
                    "/auth/login",
                    limited(post(login), RateLimitAction::Login),
                );
        }

        if self.refresh_token {
            router = router.route("/auth/refresh", post(refresh_token));
        }

        if self.wechat {
            router = router
                .route("/auth/wechat/oauth", post(wechat_oauth))
                .route("/auth/wechat/mp/register", post(mini_program_register))
                .route("/auth/wechat/mp/login", post(mini_program_login));
        }

        if self.google {
            router = router.route("/auth/google/oauth", post(google_oauth));
        }

        if self.email_verification {
            router = router
                .route(
                    "/auth/email/send",
                    limited(post(send_email_code), RateLimitAction::EmailSend),
                )
                .route(
                    "/auth/email/verify",
                    limited(post(verify_email), RateLimitAction::EmailVerify),
                );
        }

        if self.password_reset {
            router = router
                .route(
                    "/auth/password/reset/send",
                    limited(
                        post(send_password_reset),
                        RateLimitAction::PasswordResetSend,
                    ),
                )
                .route(
                    "/auth/password/reset/confirm",
                    limited(
                        post(confirm_password_reset),
                        RateLimitAction::PasswordResetConfirm,
                    ),
                );
        }

        if self.identity_binding {
            let binding = Router::new()
                .route("/auth/google/bind", post(bind_google).delete(unbind_google))
                .route("/auth/wechat/bind", post(bind_wechat).delete(unbind_wechat))
                .route_layer(from_fn_with_state(state.clone(), auth_middleware));
            router = router.merge(binding);
        }

        router.with_state(state)
    }
}

/// Router with every route group enabled
pub fn create_routes(state: AppState) -> Router {
    RouterBuilder::with_all_routes().build(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_builder_new() {
        let builder = RouterBuilder::new();
        assert!(!builder.health_check);
        assert!(!builder.password_auth);
        assert!(!builder.identity_binding);
    }

    #[test]
    fn test_router_builder_with_all_routes() {
        let builder = RouterBuilder::with_all_routes();
        assert!(builder.health_check);
        assert!(builder.password_auth);
        assert!(builder.refresh_token);
        assert!(builder.wechat);
        assert!(builder.google);
        assert!(builder.identity_binding);
        assert!(builder.email_verification);
        assert!(builder.password_reset);
    }

    #[test]
    fn test_router_builder_individual_methods() {
        let builder = RouterBuilder::with_minimal_routes()
            .google(true)
            .identity_binding(true)
            .health_check(false);

        assert!(!builder.health_check);
        assert!(builder.google);
        assert!(builder.identity_binding);
        assert!(!builder.wechat);
    }
}
