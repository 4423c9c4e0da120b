//! Request and Response Models
//!
//! Data structures for API request and response payloads with validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::models::{auth::TokenPair, identity::LinkedIdentity};
use crate::utils::validation::{
    email_validator, messages, phone_validator, validate_password_strength,
};

/// Request payload for password registration
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_register_identifiers"))]
pub struct RegisterRequest {
    #[validate(custom(function = "email_validator"))]
    pub email: Option<String>,

    #[validate(custom(function = "phone_validator"))]
    pub phone: Option<String>,

    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,

    #[validate(custom(function = "validate_password_strength"))]
    pub password: String,
}

fn validate_register_identifiers(request: &RegisterRequest) -> Result<(), ValidationError> {
    let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
    if present(&request.email) || present(&request.phone) {
        Ok(())
    } else {
        let mut error = ValidationError::new("account_required");
        error.message = Some(messages::ACCOUNT_REQUIRED.into());
        Err(error)
    }
}

/// Request payload for password login
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    /// Email address or phone number
    #[validate(length(min = 1, max = 254, message = "Account cannot be empty"))]
    pub account: String,

    #[validate(length(min = 1, max = 128, message = "Password cannot be empty"))]
    pub password: String,

    /// Clear a soft-delete marker on successful login
    #[serde(default)]
    pub restore: bool,
}

/// Request payload for refreshing tokens
#[derive(Debug, Deserialize, Validate)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "Refresh token cannot be empty"))]
    pub refresh_token: String,
}

/// Authorization code handed back by a provider's consent screen
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OAuthCodeRequest {
    #[validate(length(min = 1, max = 1024, message = "Authorization code cannot be empty"))]
    pub code: String,
}

/// Request payload for sending a verification or reset code
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SendCodeRequest {
    #[validate(custom(function = "email_validator"))]
    pub email: String,
}

/// Request payload for confirming an email address
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VerifyEmailRequest {
    #[validate(custom(function = "email_validator"))]
    pub email: String,

    #[validate(length(min = 6, max = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

/// Request payload for completing a password reset
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PasswordResetConfirmRequest {
    #[validate(custom(function = "email_validator"))]
    pub email: String,

    #[validate(length(min = 6, max = 6, message = "Code must be 6 digits"))]
    pub code: String,

    #[validate(custom(function = "validate_password_strength"))]
    pub new_password: String,
}

/// Token payload of every sign-in response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,

    /// Only present on provider sign-in responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_new_user: Option<bool>,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: pair.token_type,
            expires_in: pair.expires_in,
            is_new_user: None,
        }
    }
}

impl TokenResponse {
    pub fn with_new_user(mut self, is_new_user: bool) -> Self {
        self.is_new_user = Some(is_new_user);
        self
    }
}

/// Summary of a linked identity returned by bind
#[derive(Debug, Serialize)]
pub struct LinkedIdentityResponse {
    pub provider: String,
    pub linked_at: DateTime<Utc>,
}

impl From<LinkedIdentity> for LinkedIdentityResponse {
    fn from(identity: LinkedIdentity) -> Self {
        Self {
            provider: identity.provider,
            linked_at: identity.created_at,
        }
    }
}

/// Response for health check
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_requires_email_or_phone() {
        let request = RegisterRequest {
            email: None,
            phone: None,
            name: None,
            password: "Abc12345".into(),
        };
        assert!(request.validate().is_err());

        let request = RegisterRequest {
            email: Some("a@b.com".into()),
            ..request
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_register_request_rejects_weak_password() {
        let request = RegisterRequest {
            email: Some("a@b.com".into()),
            phone: None,
            name: None,
            password: "short".into(),
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("password"));
    }

    #[test]
    fn test_login_request_restore_defaults_false() {
        let request: LoginRequest =
            serde_json::from_str(r#"{"account":"a@b.com","password":"x"}"#).unwrap();
        assert!(!request.restore);
    }

    #[test]
    fn test_token_response_omits_new_user_flag_by_default() {
        let response = TokenResponse::from(TokenPair::new("a".into(), "r".into(), 3600));
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("is_new_user").is_none());
        assert_eq!(value["token_type"], "Bearer");

        let value = serde_json::to_value(response.with_new_user(true)).unwrap();
        assert_eq!(value["is_new_user"], true);
    }
}
