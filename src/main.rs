//! Auth Service Server
//!
//! Loads configuration from the environment, connects Postgres and the shared
//! key-value store, and serves every enabled sign-in flow.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use dotenv::dotenv;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use auth_service::{
    api::{handle_panic, AppState, RouterBuilder},
    config::{AppConfig, ServerConfig},
    service::{
        email_service::EmailSender, AuthService, GoogleOAuthClient, IdentityResolver,
        LogEmailSender, RateLimiter, SmtpEmailSender, TokenService, VerificationCodeService,
        WeChatOAuthClient,
    },
    store::{
        CodeStore, CounterStore, MemoryKvStore, PgUserStore, RedisKvStore, ReplayGuard,
    },
    utils::error::set_expose_internal_details,
};

type KvStores = (
    Arc<dyn CounterStore>,
    Arc<dyn CodeStore>,
    Arc<dyn ReplayGuard>,
);

fn kv_stores<S>(store: Arc<S>) -> KvStores
where
    S: CounterStore + CodeStore + ReplayGuard + 'static,
{
    (store.clone(), store.clone(), store)
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter(|origin| origin.as_str() != "*")
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || server.cors_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
    log::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv().ok();

    env_logger::init();

    log::info!("Starting auth service v{}", auth_service::VERSION);

    let config = AppConfig::from_env()?;
    config.validate()?;
    set_expose_internal_details(config.server.environment.is_development());

    log::info!("Configuration loaded and validated");

    let database_pool = config.database.create_pool().await?;

    log::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&database_pool).await?;

    let users = Arc::new(PgUserStore::new(database_pool));

    let (counters, codes, replay_guard) = match &config.store.redis_url {
        Some(url) => {
            let redis = RedisKvStore::connect(url)
                .await?
                .with_prefix(config.store.key_prefix.clone());
            redis.ping().await?;
            log::info!("Shared store: Redis");
            kv_stores(Arc::new(redis))
        }
        None => {
            log::warn!("REDIS_URL not set; counters, codes and replay markers are process-local");
            let memory = Arc::new(MemoryKvStore::new());
            let janitor = memory.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                loop {
                    interval.tick().await;
                    janitor.purge_expired().await;
                }
            });
            kv_stores(memory)
        }
    };

    let email: Arc<dyn EmailSender> = match &config.email {
        Some(email_config) => {
            let sender = SmtpEmailSender::new(email_config.clone())?;
            match sender.test_connection().await {
                Ok(true) => log::info!("SMTP connection verified"),
                Ok(false) | Err(_) => log::warn!("SMTP server did not accept a test connection"),
            }
            Arc::new(sender)
        }
        None => {
            log::warn!("SMTP not configured; verification codes are only logged");
            Arc::new(LogEmailSender)
        }
    };

    let identities =
        IdentityResolver::new(users.clone()).with_bcrypt_cost(config.security.bcrypt_cost);

    let mut tokens = TokenService::new(
        users.clone(),
        config.jwt.access_secret.clone(),
        config.jwt.refresh_secret.clone(),
        config.jwt.issuer.clone(),
    );
    if config.jwt.refresh_rotation {
        tokens = tokens.with_replay_guard(replay_guard);
    } else {
        log::warn!("Refresh token rotation disabled; refresh tokens are reusable until expiry");
    }

    let verification = VerificationCodeService::new(codes, email).with_code_ttl(
        chrono::Duration::minutes(config.verification.code_ttl_minutes),
    );

    let mut auth = AuthService::new(users, identities, tokens, verification);
    if let Some(google) = &config.google {
        auth = auth.with_provider(Arc::new(GoogleOAuthClient::new(google)?));
        log::info!("Google sign-in enabled");
    }
    if let Some(wechat) = &config.wechat {
        auth = auth.with_provider(Arc::new(WeChatOAuthClient::new(wechat)?));
        log::info!("WeChat web sign-in enabled");
    }

    let rate_limiting = &config.security.rate_limiting;
    let rate_limiter = RateLimiter::new(counters, rate_limiting.limits.clone())
        .enabled(rate_limiting.enabled)
        .with_policy(rate_limiting.on_store_error)
        .with_operation_timeout(Duration::from_millis(config.store.operation_timeout_ms))
        .trust_forwarded_for(rate_limiting.trust_forwarded_for);
    log::info!(
        "Rate limiting: {} (on store error: {:?})",
        rate_limiting.enabled,
        rate_limiting.on_store_error
    );

    let state = AppState {
        auth: Arc::new(auth),
        rate_limiter: Arc::new(rate_limiter),
    };

    let app = RouterBuilder::with_all_routes()
        .google(config.google.is_some())
        .build(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(cors_layer(&config.server))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.server.request_timeout_seconds,
                )))
                .into_inner(),
        );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    log::info!("Listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
