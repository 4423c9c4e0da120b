//! HTTP Request Handlers
//!
//! Axum handlers for password sign-in, token refresh, verification codes and
//! health checks.

use std::any::Any;
use std::sync::Arc;

use axum::{
    extract::{FromRequest, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::json;
use validator::{Validate, ValidationErrors};

use crate::{
    models::requests::*,
    service::{AuthService, RateLimiter},
    utils::error::{ApiResponse, AppError, AppResult, ErrorResponse},
    VERSION,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub rate_limiter: Arc<RateLimiter>,
}

/// JSON body that has passed `validator` checks
///
/// Malformed bodies are reported in the standard error envelope.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection.body_text()))?;

        value.validate().map_err(handle_validation_error)?;
        Ok(ValidatedJson(value))
    }
}

type TokenReply = AppResult<(StatusCode, Json<ApiResponse<TokenResponse>>)>;

fn token_reply(status: StatusCode, message: &str, tokens: TokenResponse) -> TokenReply {
    Ok((status, Json(ApiResponse::success(message, tokens))))
}

/// Register with email or phone and password
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<RegisterRequest>,
) -> TokenReply {
    let (_user, tokens) = state.auth.register(request).await?;
    token_reply(StatusCode::CREATED, "Registration successful", tokens.into())
}

/// Sign in with email or phone and password
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> TokenReply {
    let tokens = state.auth.login(request).await?;
    token_reply(StatusCode::OK, "Login successful", tokens.into())
}

/// Exchange a refresh token for a new pair
pub async fn refresh_token(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<RefreshTokenRequest>,
) -> TokenReply {
    let tokens = state.auth.refresh(&request.refresh_token).await?;
    token_reply(StatusCode::OK, "Token refreshed", tokens.into())
}

const CODE_SENT_MESSAGE: &str = "If the address belongs to an account, a code has been sent";

pub async fn send_email_code(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<SendCodeRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.auth.send_email_verification(&request.email).await?;
    Ok(Json(ApiResponse::success(CODE_SENT_MESSAGE, ())))
}

pub async fn verify_email(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<VerifyEmailRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.auth.verify_email(&request.email, &request.code).await?;
    Ok(Json(ApiResponse::success("Email verified", ())))
}

pub async fn send_password_reset(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<SendCodeRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.auth.send_password_reset(&request.email).await?;
    Ok(Json(ApiResponse::success(CODE_SENT_MESSAGE, ())))
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<PasswordResetConfirmRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    state
        .auth
        .confirm_password_reset(&request.email, &request.code, request.new_password)
        .await?;
    Ok(Json(ApiResponse::success("Password has been reset", ())))
}

/// Health check endpoint
pub async fn health_check(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<HealthCheckResponse>>> {
    state.auth.health().await?;

    let response = HealthCheckResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: VERSION.to_string(),
    };

    Ok(Json(ApiResponse::success("Service is healthy", response)))
}

/// Handle validation errors from request parsing
pub fn handle_validation_error(err: ValidationErrors) -> AppError {
    let mut messages = Vec::new();

    for (field, errors) in err.field_errors() {
        for error in errors {
            let message = error
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("Invalid value for field '{}'", field));
            if field == "__all__" {
                messages.push(message);
            } else {
                messages.push(format!("{}: {}", field, message));
            }
        }
    }
    messages.sort();

    AppError::Validation(messages.join(", "))
}

/// Converts a caught handler panic into the generic 500 envelope
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    let backtrace = std::backtrace::Backtrace::force_capture();
    log::error!("Request handler panicked: {}\n{}", detail, backtrace);

    let body = ErrorResponse::error_with_details(
        "INTERNAL_ERROR",
        "An internal server error occurred",
        json!({}),
    );
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}
