//! Error Handling Utilities
//!
//! The central error type for the HTTP boundary. Each service owns a narrower
//! error enum and converts into [`AppError`] through `From`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

static EXPOSE_INTERNAL_DETAILS: AtomicBool = AtomicBool::new(false);

/// Toggle whether 500 responses carry the underlying error text.
///
/// Only ever enabled in development mode.
pub fn set_expose_internal_details(enabled: bool) {
    EXPOSE_INTERNAL_DETAILS.store(enabled, Ordering::Relaxed);
}

fn expose_internal_details() -> bool {
    EXPOSE_INTERNAL_DETAILS.load(Ordering::Relaxed)
}

/// Main application error type surfaced by handlers and middleware
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed or missing input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Wrong account identifier or password
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Missing or malformed bearer credentials
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Token failed signature, expiry, kind or replay checks
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    /// Account is banned or soft-deleted
    #[error("Account unavailable")]
    AccountUnavailable,

    /// Resource not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., duplicate email or phone)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Identity is already linked to another account")]
    AlreadyLinkedToOther,

    #[error("Identity is already linked to this account")]
    AlreadyLinkedToSelf,

    #[error("Account already has a linked {0} identity")]
    ProviderAlreadyBound(String),

    #[error("No linked {0} identity")]
    NoSuchLink(String),

    #[error("Cannot remove the last credential of an account")]
    WouldRemoveLastCredential,

    #[error("Verification code does not match")]
    CodeMismatch,

    #[error("Verification code has expired")]
    CodeExpired,

    #[error("Verification code has already been used")]
    CodeAlreadyConsumed,

    /// Rate limiting rejection with a retry hint in seconds
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// External service errors
    #[error("External service error: {0}")]
    ExternalService(String),

    /// A required backing service is unreachable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Generic internal server errors
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Response envelope shared by success and error bodies
#[derive(Serialize, Debug)]
pub struct ApiResponse<T: Serialize> {
    pub status: &'static str,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            status: "success",
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Error body: `{status: "error", message, data: {error, ...}}`
pub type ErrorResponse = ApiResponse<serde_json::Value>;

impl ErrorResponse {
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            status: "error",
            message: message.to_string(),
            data: Some(json!({ "error": code })),
        }
    }

    pub fn error_with_details(code: &str, message: &str, details: serde_json::Value) -> Self {
        let mut data = json!({ "error": code });
        if let (Some(target), serde_json::Value::Object(extra)) = (data.as_object_mut(), details)
        {
            target.extend(extra);
        }
        Self {
            status: "error",
            message: message.to_string(),
            data: Some(data),
        }
    }
}

impl AppError {
    /// HTTP status, stable error code and client-facing message
    pub fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                self.to_string(),
            ),
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, "AUTHENTICATION_ERROR", msg.clone())
            }
            AppError::InvalidOrExpiredToken => (
                StatusCode::UNAUTHORIZED,
                "INVALID_OR_EXPIRED_TOKEN",
                self.to_string(),
            ),
            AppError::AccountUnavailable => (
                StatusCode::FORBIDDEN,
                "ACCOUNT_UNAVAILABLE",
                self.to_string(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::AlreadyLinkedToOther => (
                StatusCode::CONFLICT,
                "ALREADY_LINKED_TO_OTHER",
                self.to_string(),
            ),
            AppError::AlreadyLinkedToSelf => (
                StatusCode::CONFLICT,
                "ALREADY_LINKED_TO_SELF",
                self.to_string(),
            ),
            AppError::ProviderAlreadyBound(_) => (
                StatusCode::CONFLICT,
                "PROVIDER_ALREADY_BOUND",
                self.to_string(),
            ),
            AppError::NoSuchLink(_) => (StatusCode::NOT_FOUND, "NO_SUCH_LINK", self.to_string()),
            AppError::WouldRemoveLastCredential => (
                StatusCode::BAD_REQUEST,
                "WOULD_REMOVE_LAST_CREDENTIAL",
                self.to_string(),
            ),
            AppError::CodeMismatch => (StatusCode::BAD_REQUEST, "CODE_MISMATCH", self.to_string()),
            AppError::CodeExpired => (StatusCode::BAD_REQUEST, "CODE_EXPIRED", self.to_string()),
            AppError::CodeAlreadyConsumed => (
                StatusCode::BAD_REQUEST,
                "CODE_ALREADY_CONSUMED",
                self.to_string(),
            ),
            AppError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Too many requests, please try again later".to_string(),
            ),
            AppError::ExternalService(_) => (
                StatusCode::BAD_GATEWAY,
                "EXTERNAL_SERVICE_ERROR",
                "External service unavailable".to_string(),
            ),
            AppError::ServiceUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "Service temporarily unavailable".to_string(),
            ),
            AppError::Database(_) | AppError::Internal(_) | AppError::Configuration(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal server error occurred".to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = self.parts();

        let body = match &self {
            AppError::RateLimited { retry_after } => ErrorResponse::error_with_details(
                error_code,
                &message,
                json!({ "retry_after": retry_after }),
            ),
            AppError::Database(_) | AppError::Internal(_) | AppError::Configuration(_) => {
                log::error!("Request failed: {}", self);
                if expose_internal_details() {
                    ErrorResponse::error_with_details(
                        error_code,
                        &message,
                        json!({ "detail": self.to_string() }),
                    )
                } else {
                    ErrorResponse::error(error_code, &message)
                }
            }
            _ => ErrorResponse::error(error_code, &message),
        };

        let mut response = (status, Json(body)).into_response();
        if let AppError::RateLimited { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for operations that can return AppError
pub type AppResult<T> = Result<T, AppError>;

/// Helper trait for converting other error types to AppError
pub trait IntoAppError<T> {
    fn into_app_error(self, context: &str) -> AppResult<T>;
}

impl<T, E> IntoAppError<T> for Result<T, E>
where
    E: fmt::Display,
{
    fn into_app_error(self, context: &str) -> AppResult<T> {
        self.map_err(|e| AppError::Internal(format!("{}: {}", context, e)))
    }
}
