//! Verification Code Model
//!
//! Short-lived codes that gate email confirmation and password reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a verification code authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodePurpose {
    EmailVerify,
    PasswordReset,
}

impl CodePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePurpose::EmailVerify => "email_verify",
            CodePurpose::PasswordReset => "password_reset",
        }
    }
}

impl std::fmt::Display for CodePurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored code record, one per (purpose, target)
///
/// Timestamps are serialized as Unix seconds so the Redis consume script can
/// compare them without date parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationCode {
    pub code: String,

    pub purpose: CodePurpose,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,

    #[serde(default)]
    pub consumed: bool,
}

impl VerificationCode {
    pub fn new(code: String, purpose: CodePurpose, ttl: chrono::Duration) -> Self {
        let created_at = Utc::now();
        Self {
            code,
            purpose,
            created_at,
            expires_at: created_at + ttl,
            consumed: false,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.expires_at.timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_inclusive() {
        let code = VerificationCode::new(
            "123456".into(),
            CodePurpose::EmailVerify,
            chrono::Duration::minutes(10),
        );
        assert!(!code.is_expired_at(code.created_at));
        assert!(code.is_expired_at(code.expires_at));
    }

    #[test]
    fn test_timestamps_serialize_as_seconds() {
        let code = VerificationCode::new(
            "000042".into(),
            CodePurpose::PasswordReset,
            chrono::Duration::minutes(10),
        );
        let value = serde_json::to_value(&code).unwrap();
        assert_eq!(value["expires_at"], code.expires_at.timestamp());
        assert_eq!(value["purpose"], "password_reset");
        assert_eq!(value["consumed"], false);
    }
}
