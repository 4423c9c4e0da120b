//! Router-level tests over in-memory stores, a fake Google client and a
//! capturing email sender.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::ServiceExt;

use auth_service::{
    api::{AppState, RouterBuilder},
    config::StoreErrorPolicy,
    models::identity::{Provider, ProviderIdentity},
    service::{
        email_service::{CodeEmail, EmailResult, EmailSender},
        oauth_service::{OAuthClientError, OAuthClientResult, OAuthProviderClient},
        rate_limit_service::{RateLimit, RateLimitAction, RateLimitConfig},
        AuthService, IdentityResolver, RateLimiter, TokenService, VerificationCodeService,
    },
    store::{
        CounterStore, CounterWindow, MemoryKvStore, MemoryUserStore, StoreError, StoreResult,
        UserStore,
    },
};

#[derive(Default)]
struct CapturingSender {
    sent: Mutex<Vec<CodeEmail>>,
}

#[async_trait]
impl EmailSender for CapturingSender {
    async fn send_code(&self, email: &CodeEmail) -> EmailResult<()> {
        self.sent.lock().await.push(email.clone());
        Ok(())
    }
}

/// Maps code `x` to Google subject `google-x`
struct FakeGoogle;

#[async_trait]
impl OAuthProviderClient for FakeGoogle {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn exchange_code(&self, code: &str) -> OAuthClientResult<ProviderIdentity> {
        if code == "expired" {
            return Err(OAuthClientError::InvalidCode("invalid_grant".into()));
        }
        Ok(ProviderIdentity::new(Provider::Google, format!("google-{}", code)))
    }
}

struct BrokenCounters;

#[async_trait]
impl CounterStore for BrokenCounters {
    async fn increment(&self, _key: &str, _window: Duration) -> StoreResult<CounterWindow> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn peek(&self, _key: &str) -> StoreResult<Option<CounterWindow>> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn reset(&self, _key: &str) -> StoreResult<()> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

struct TestApp {
    router: Router,
    users: Arc<MemoryUserStore>,
    mail: Arc<CapturingSender>,
}

fn build_app(counters: Arc<dyn CounterStore>, policy: StoreErrorPolicy) -> TestApp {
    let users = Arc::new(MemoryUserStore::new());
    let kv = Arc::new(MemoryKvStore::new());
    let mail = Arc::new(CapturingSender::default());

    let tokens = TokenService::new(
        users.clone(),
        "integration-access-secret".into(),
        "integration-refresh-secret".into(),
        "auth-service".into(),
    )
    .with_replay_guard(kv.clone());
    let codes = VerificationCodeService::new(kv, mail.clone());
    let identities = IdentityResolver::new(users.clone()).with_bcrypt_cost(4);
    let auth = AuthService::new(users.clone(), identities, tokens, codes)
        .with_provider(Arc::new(FakeGoogle));

    let mut limits = RateLimitConfig::default();
    limits.set(RateLimitAction::EmailSend, RateLimit::new(3, 600));
    let rate_limiter = RateLimiter::new(counters, limits).with_policy(policy);

    let state = AppState {
        auth: Arc::new(auth),
        rate_limiter: Arc::new(rate_limiter),
    };

    TestApp {
        router: RouterBuilder::with_all_routes().build(state),
        users,
        mail,
    }
}

fn test_app() -> TestApp {
    build_app(Arc::new(MemoryKvStore::new()), StoreErrorPolicy::Allow)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn with_bearer(mut request: Request<Body>, token: &str) -> Request<Body> {
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {}", token).parse().unwrap(),
    );
    request
}

fn mini_program(uri: &str, openid: &str, unionid: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-wx-openid", openid)
        .header("x-wx-unionid", unionid)
        .body(Body::empty())
        .unwrap()
}

async fn call(app: &TestApp, request: Request<Body>) -> (StatusCode, Value, Response) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let (parts, body) = response.into_parts();
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json, Response::from_parts(parts, Body::empty()))
}

async fn register(app: &TestApp, email: &str) -> Value {
    let (status, body, _) = call(
        app,
        post(
            "/auth/register",
            json!({"email": email, "password": "Secret123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["data"].clone()
}

async fn google_sign_in(app: &TestApp, code: &str) -> (StatusCode, Value) {
    let (status, body, _) = call(app, post("/auth/google/oauth", json!({ "code": code }))).await;
    (status, body["data"].clone())
}

async fn user_id_of(app: &TestApp, email: &str) -> i64 {
    app.users.find_by_email(email).await.unwrap().unwrap().id
}

#[tokio::test]
async fn register_login_refresh_end_to_end() {
    let app = test_app();

    let registered = register(&app, "e2e@example.com").await;
    assert!(!registered["access_token"].as_str().unwrap().is_empty());
    assert_eq!(registered["token_type"], "Bearer");
    assert_eq!(registered["expires_in"], 3600);

    let (status, login, _) = call(
        &app,
        post(
            "/auth/login",
            json!({"account": "e2e@example.com", "password": "Secret123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["status"], "success");
    let refresh_token = login["data"]["refresh_token"].as_str().unwrap().to_string();

    let (status, refreshed, _) = call(
        &app,
        post("/auth/refresh", json!({ "refresh_token": refresh_token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(refreshed["data"]["refresh_token"], login["data"]["refresh_token"]);
    assert_ne!(refreshed["data"]["access_token"], login["data"]["access_token"]);

    let (status, replay, _) = call(
        &app,
        post("/auth/refresh", json!({ "refresh_token": refresh_token })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(replay["data"]["error"], "INVALID_OR_EXPIRED_TOKEN");
}

#[tokio::test]
async fn duplicate_registration_and_bad_credentials() {
    let app = test_app();
    register(&app, "dup@example.com").await;

    let (status, body, _) = call(
        &app,
        post(
            "/auth/register",
            json!({"email": "DUP@example.com", "password": "Secret123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["data"]["error"], "CONFLICT");

    let (status, body, _) = call(
        &app,
        post(
            "/auth/login",
            json!({"account": "dup@example.com", "password": "Wrong1234"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["data"]["error"], "INVALID_CREDENTIALS");

    let (status, body, _) = call(
        &app,
        post("/auth/register", json!({"password": "Secret123"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"]["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn oauth_exchange_is_login_or_register() {
    let app = test_app();

    let (status, first) = google_sign_in(&app, "alice").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["is_new_user"], true);

    let (status, second) = google_sign_in(&app, "alice").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["is_new_user"], false);

    let identity = app
        .users
        .find_identity(Provider::Google, "google-alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(app.users.list_identities(identity.user_id).await.unwrap().len(), 1);

    let (status, _) = google_sign_in(&app, "expired").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn binding_identity_owned_by_another_user_conflicts() {
    let app = test_app();

    google_sign_in(&app, "bob").await;
    let a = register(&app, "a@example.com").await;
    let a_token = a["access_token"].as_str().unwrap();

    let (status, body, _) = call(
        &app,
        with_bearer(post("/auth/google/bind", json!({"code": "bob"})), a_token),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["data"]["error"], "ALREADY_LINKED_TO_OTHER");

    let a_id = user_id_of(&app, "a@example.com").await;
    assert!(app.users.list_identities(a_id).await.unwrap().is_empty());

    let (status, _, _) = call(
        &app,
        with_bearer(post("/auth/google/bind", json!({"code": "a-own"})), a_token),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body, _) = call(
        &app,
        with_bearer(post("/auth/google/bind", json!({"code": "a-own"})), a_token),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["data"]["error"], "ALREADY_LINKED_TO_SELF");
}

#[tokio::test]
async fn binding_requires_bearer_token() {
    let app = test_app();

    let (status, body, _) = call(&app, post("/auth/google/bind", json!({"code": "x"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["data"]["error"], "AUTHENTICATION_ERROR");

    let (status, body, _) = call(
        &app,
        with_bearer(post("/auth/google/bind", json!({"code": "x"})), "garbage"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["data"]["error"], "INVALID_OR_EXPIRED_TOKEN");
}

#[tokio::test]
async fn unbinding_last_credential_is_refused() {
    let app = test_app();
    let (_, carol) = google_sign_in(&app, "carol").await;
    let token = carol["access_token"].as_str().unwrap();

    let request = Request::builder()
        .method("DELETE")
        .uri("/auth/google/bind")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = call(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"]["error"], "WOULD_REMOVE_LAST_CREDENTIAL");

    let request = Request::builder()
        .method("DELETE")
        .uri("/auth/wechat/bind")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = call(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["data"]["error"], "NO_SUCH_LINK");
}

#[tokio::test]
async fn password_user_can_bind_and_unbind_wechat() {
    let app = test_app();
    let dave = register(&app, "dave@example.com").await;
    let token = dave["access_token"].as_str().unwrap();

    let bind = Request::builder()
        .method("POST")
        .uri("/auth/wechat/bind")
        .header("authorization", format!("Bearer {}", token))
        .header("x-wx-openid", "o-dave")
        .header("x-wx-unionid", "u-dave")
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = call(&app, bind).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["provider"], "wechat");

    let (status, _, _) = call(&app, mini_program("/auth/wechat/mp/login", "o-dave", "u-dave")).await;
    assert_eq!(status, StatusCode::OK);

    let unbind = Request::builder()
        .method("DELETE")
        .uri("/auth/wechat/bind")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = call(&app, unbind).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn mini_program_register_and_login() {
    let app = test_app();

    let missing = Request::builder()
        .method("POST")
        .uri("/auth/wechat/mp/register")
        .header("x-wx-openid", "o-1")
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = call(&app, missing).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"]["error"], "VALIDATION_ERROR");

    let (status, _, _) = call(&app, mini_program("/auth/wechat/mp/login", "o-1", "u-1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body, _) = call(&app, mini_program("/auth/wechat/mp/register", "o-1", "u-1")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["is_new_user"], true);

    // Same person through another Mini-Program: same unionid, new openid
    let (status, body, _) = call(&app, mini_program("/auth/wechat/mp/register", "o-2", "u-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_new_user"], false);

    let (status, body, _) = call(&app, mini_program("/auth/wechat/mp/login", "o-1", "u-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].get("is_new_user").is_none());
}

#[tokio::test]
async fn refresh_for_banned_user_is_refused() {
    let app = test_app();
    let tokens = register(&app, "banned@example.com").await;

    let id = user_id_of(&app, "banned@example.com").await;
    app.users.set_banned(id, true).await.unwrap();

    let (status, body, _) = call(
        &app,
        post(
            "/auth/refresh",
            json!({ "refresh_token": tokens["refresh_token"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["data"]["error"], "ACCOUNT_UNAVAILABLE");

    let (status, _, _) = call(
        &app,
        post(
            "/auth/login",
            json!({"account": "banned@example.com", "password": "Secret123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn email_send_is_rate_limited_per_identifier() {
    let app = test_app();

    for expected_remaining in ["2", "1", "0"] {
        let (status, body, response) = call(
            &app,
            post("/auth/email/send", json!({"email": "a@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(response.headers()["x-ratelimit-remaining"], expected_remaining);
        assert_eq!(response.headers()["x-ratelimit-window"], "600");
    }

    let (status, body, response) = call(
        &app,
        post("/auth/email/send", json!({"email": "A@Example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["data"]["error"], "RATE_LIMITED");

    let retry_after = body["data"]["retry_after"].as_u64().unwrap();
    assert!(retry_after > 0 && retry_after <= 600);
    assert_eq!(
        response.headers()["retry-after"],
        retry_after.to_string().as_str()
    );

    let (status, _, _) = call(
        &app,
        post("/auth/email/send", json!({"email": "b@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn store_failure_follows_policy() {
    let deny = build_app(Arc::new(BrokenCounters), StoreErrorPolicy::Deny);
    let (status, body, _) = call(
        &deny,
        post("/auth/email/send", json!({"email": "a@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["data"]["error"], "SERVICE_UNAVAILABLE");

    let allow = build_app(Arc::new(BrokenCounters), StoreErrorPolicy::Allow);
    let (status, _, response) = call(
        &allow,
        post("/auth/email/send", json!({"email": "a@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.headers().get("x-ratelimit-remaining").is_none());
}

#[tokio::test]
async fn email_verification_codes_are_single_use() {
    let app = test_app();
    register(&app, "verify@example.com").await;

    let (status, body, _) = call(
        &app,
        post("/auth/email/send", json!({"email": "nobody@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let unknown_message = body["message"].clone();
    assert!(app.mail.sent.lock().await.is_empty());

    let (status, body, _) = call(
        &app,
        post("/auth/email/send", json!({"email": "verify@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], unknown_message);

    let code = app.mail.sent.lock().await[0].code.clone();
    let confirm = json!({"email": "verify@example.com", "code": code});

    let (status, _, _) = call(&app, post("/auth/email/verify", confirm.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let id = user_id_of(&app, "verify@example.com").await;
    assert!(app.users.find_by_id(id).await.unwrap().unwrap().email_verified);

    let (status, body, _) = call(&app, post("/auth/email/verify", confirm)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"]["error"], "CODE_ALREADY_CONSUMED");
}

#[tokio::test]
async fn password_reset_replaces_password() {
    let app = test_app();
    register(&app, "reset@example.com").await;

    call(
        &app,
        post("/auth/password/reset/send", json!({"email": "reset@example.com"})),
    )
    .await;
    let first = app.mail.sent.lock().await[0].code.clone();

    call(
        &app,
        post("/auth/password/reset/send", json!({"email": "reset@example.com"})),
    )
    .await;
    let second = app.mail.sent.lock().await[1].code.clone();

    if first != second {
        let (status, body, _) = call(
            &app,
            post(
                "/auth/password/reset/confirm",
                json!({"email": "reset@example.com", "code": first, "new_password": "Changed123"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["data"]["error"], "CODE_MISMATCH");
    }

    let (status, body, _) = call(
        &app,
        post(
            "/auth/password/reset/confirm",
            json!({"email": "reset@example.com", "code": "123456", "new_password": "weak"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"]["error"], "VALIDATION_ERROR");

    let (status, _, _) = call(
        &app,
        post(
            "/auth/password/reset/confirm",
            json!({"email": "reset@example.com", "code": second, "new_password": "Changed123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = call(
        &app,
        post(
            "/auth/login",
            json!({"account": "reset@example.com", "password": "Changed123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_check_reports_healthy() {
    let app = test_app();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let (status, body, _) = call(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "healthy");
}

#[tokio::test]
async fn login_limit_counts_phone_formattings_together() {
    let app = test_app();
    let (status, body, _) = call(
        &app,
        post(
            "/auth/register",
            json!({"phone": "+8613800000000", "password": "Secret123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let formattings = [
        "+86 13800000000",
        "+86-138-0000-0000",
        "+86(138)00000000",
        " +86 138 0000 0000 ",
        "+8613800000000",
    ];
    for account in formattings.iter().cycle().take(10) {
        let (status, _, _) = call(
            &app,
            post(
                "/auth/login",
                json!({"account": account, "password": "Wrong1234"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, body, _) = call(
        &app,
        post(
            "/auth/login",
            json!({"account": "+86 (138) 0000-0000", "password": "Secret123"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["data"]["error"], "RATE_LIMITED");
}
