//! Rate Limiting Middleware
//!
//! Counts abuse-prone requests per action and identifier. The identifier is
//! read from the request (JSON body, query, then form) and falls back to the
//! client IP.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};

use crate::service::rate_limit_service::{
    RateLimitAction, RateLimitDecision, RateLimitStatus, RateLimiter,
};
use crate::utils::error::AppError;

/// Largest body buffered for identifier extraction
pub const MAX_BUFFERED_BODY: usize = 64 * 1024;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const WINDOW_HEADER: &str = "x-ratelimit-window";

/// Middleware state: the shared limiter plus the action a route counts against
#[derive(Clone)]
pub struct RateLimitGuard {
    pub limiter: Arc<RateLimiter>,
    pub action: RateLimitAction,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<RateLimiter>, action: RateLimitAction) -> Self {
        Self { limiter, action }
    }
}

pub async fn rate_limit_middleware(
    State(guard): State<RateLimitGuard>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BUFFERED_BODY)
        .await
        .map_err(|_| AppError::Validation("Request body too large".to_string()))?;

    let identifier = guard
        .action
        .identifier(parts.uri.query(), &bytes)
        .unwrap_or_else(|| guard.limiter.fallback_identifier(&parts.headers, remote));

    let decision = guard
        .limiter
        .check_and_record(guard.action, &identifier)
        .await?;

    let request = Request::from_parts(parts, Body::from(bytes));
    let mut response = next.run(request).await;

    if let RateLimitDecision::Allowed(status) = decision {
        insert_status_headers(&mut response, &status);
    }

    Ok(response)
}

fn insert_status_headers(response: &mut Response, status: &RateLimitStatus) {
    let headers = response.headers_mut();
    for (name, value) in [
        (LIMIT_HEADER, status.limit),
        (REMAINING_HEADER, status.remaining),
        (WINDOW_HEADER, status.window_seconds),
    ] {
        headers.insert(name, HeaderValue::from(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::rate_limit_service::{RateLimit, RateLimitConfig};
    use crate::store::MemoryKvStore;
    use axum::{
        http::StatusCode,
        middleware::from_fn_with_state,
        routing::post,
        Router,
    };
    use tower::ServiceExt;

    fn limited_app(path: &str, action: RateLimitAction, limit: RateLimit) -> Router {
        let mut config = RateLimitConfig::default();
        config.set(action, limit);
        let limiter = Arc::new(RateLimiter::new(Arc::new(MemoryKvStore::new()), config));

        Router::new().route(
            path,
            post(|body: String| async move { body }).layer(from_fn_with_state(
                RateLimitGuard::new(limiter, action),
                rate_limit_middleware,
            )),
        )
    }

    fn app(limit: RateLimit) -> Router {
        limited_app("/send", RateLimitAction::EmailSend, limit)
    }

    fn login(account: &str) -> Request {
        Request::builder()
            .method("POST")
            .uri("/login")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "account": account, "password": "Wrong1234" }).to_string(),
            ))
            .unwrap()
    }

    fn send(email: &str) -> Request {
        Request::builder()
            .method("POST")
            .uri("/send")
            .header("content-type", "application/json")
            .body(Body::from(format!(r#"{{"email":"{}"}}"#, email)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_body_reaches_handler_and_headers_are_set() {
        let response = app(RateLimit::new(3, 600))
            .oneshot(send("a@example.com"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[LIMIT_HEADER], "3");
        assert_eq!(response.headers()[REMAINING_HEADER], "2");
        assert_eq!(response.headers()[WINDOW_HEADER], "600");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"email":"a@example.com"}"#);
    }

    #[tokio::test]
    async fn test_identifiers_are_counted_case_insensitively() {
        let app = app(RateLimit::new(1, 600));

        let first = app.clone().oneshot(send("Case@Example.com")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.clone().oneshot(send("case@example.com")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = app.oneshot(send("other@example.com")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_phone_formattings_share_one_login_window() {
        let app = limited_app("/login", RateLimitAction::Login, RateLimit::new(3, 900));

        for account in ["+86 138 0000 0000", "+8613800000000", "+86-138-0000-0000"] {
            let response = app.clone().oneshot(login(account)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(login("+86(138)00000000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = app.oneshot(login("+8613900000000")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }
}
