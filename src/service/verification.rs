//! Verification Code Service
//!
//! Issues six-digit codes for email confirmation and password reset, and
//! validates them exactly once.

use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;

use crate::models::verification::{CodePurpose, VerificationCode};
use crate::service::email_service::{CodeEmail, EmailError, EmailSender};
use crate::store::{CodeStore, ConsumeOutcome, StoreError};
use crate::utils::{
    error::AppError,
    security::{generate_verification_code, hash_sensitive_data},
    validation::normalize_email,
};

/// Default code lifetime
pub const DEFAULT_CODE_TTL_MINUTES: i64 = 10;

/// How long records outlive their expiry so stale codes still report
/// `Expired` or `AlreadyConsumed` instead of a mismatch
const RECORD_GRACE_MINUTES: i64 = 60;

/// Verification code errors
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Verification code does not match")]
    Mismatch,

    #[error("Verification code has expired")]
    Expired,

    #[error("Verification code has already been used")]
    AlreadyConsumed,

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<VerificationError> for AppError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::Mismatch => AppError::CodeMismatch,
            VerificationError::Expired => AppError::CodeExpired,
            VerificationError::AlreadyConsumed => AppError::CodeAlreadyConsumed,
            VerificationError::Email(e) => e.into(),
            VerificationError::Store(e) => e.into(),
        }
    }
}

pub type VerificationResult<T> = Result<T, VerificationError>;

/// Issues and checks one-time codes over a [`CodeStore`]
#[derive(Clone)]
pub struct VerificationCodeService {
    codes: Arc<dyn CodeStore>,
    email: Arc<dyn EmailSender>,
    code_ttl: Duration,
}

impl VerificationCodeService {
    pub fn new(codes: Arc<dyn CodeStore>, email: Arc<dyn EmailSender>) -> Self {
        Self {
            codes,
            email,
            code_ttl: Duration::minutes(DEFAULT_CODE_TTL_MINUTES),
        }
    }

    pub fn with_code_ttl(mut self, ttl: Duration) -> Self {
        self.code_ttl = ttl;
        self
    }

    /// Store key; the target is hashed so addresses never reach the shared store
    pub fn store_key(purpose: CodePurpose, target: &str) -> String {
        format!(
            "verification:{}:{}",
            purpose,
            hash_sensitive_data(&normalize_email(target))
        )
    }

    /// Generate a code for `target`, replacing any previous one, and email it
    pub async fn issue(&self, purpose: CodePurpose, target: &str) -> VerificationResult<String> {
        let code = generate_verification_code();
        let record = VerificationCode::new(code.clone(), purpose, self.code_ttl);

        let retention = self.code_ttl + Duration::minutes(RECORD_GRACE_MINUTES);
        let retention = retention
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(60));

        self.codes
            .put_code(&Self::store_key(purpose, target), &record, retention)
            .await?;

        self.email
            .send_code(&CodeEmail {
                to: normalize_email(target),
                purpose,
                code: code.clone(),
                expires_in_minutes: self.code_ttl.num_minutes(),
            })
            .await?;

        Ok(code)
    }

    /// Consume `code` if it matches the live record for `target`
    pub async fn verify(
        &self,
        purpose: CodePurpose,
        target: &str,
        code: &str,
    ) -> VerificationResult<()> {
        let outcome = self
            .codes
            .consume_code(&Self::store_key(purpose, target), code.trim(), Utc::now())
            .await?;

        match outcome {
            ConsumeOutcome::Consumed => Ok(()),
            ConsumeOutcome::Missing | ConsumeOutcome::Mismatch => Err(VerificationError::Mismatch),
            ConsumeOutcome::AlreadyConsumed => Err(VerificationError::AlreadyConsumed),
            ConsumeOutcome::Expired => Err(VerificationError::Expired),
        }
    }
}
