//! Storage Seams
//!
//! Traits over the persistence collaborators of the auth core. The relational
//! user store owns users and linked identities; the shared key-value store owns
//! rate-limit counters, verification codes and refresh replay markers.
//!
//! All mutual exclusion lives behind these traits: unique constraints and row
//! locks in Postgres, atomic commands and scripts in Redis, a short mutex in
//! the in-memory implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    identity::{LinkedIdentity, NewIdentity, Provider},
    user::{NewUser, UserWithPassword},
    verification::VerificationCode,
};
use crate::utils::error::AppError;

pub mod memory;
pub mod postgres;
pub mod redis_kv;

pub use memory::{MemoryKvStore, MemoryUserStore};
pub use postgres::PgUserStore;
pub use redis_kv::RedisKvStore;

/// Constraint names shared by the Postgres schema and the in-memory store
pub mod constraints {
    pub const USERS_EMAIL: &str = "users_email_key";
    pub const USERS_PHONE: &str = "users_phone_key";
    pub const IDENTITY_SUBJECT: &str = "linked_identities_provider_subject_key";
    pub const IDENTITY_USER_PROVIDER: &str = "linked_identities_user_id_provider_key";
}

/// Errors raised by any store implementation
#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique constraint rejected the write; carries the constraint name
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Record not found")]
    NotFound,

    /// Backend unreachable, timed out or returned an I/O failure
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_unique_violation(&self, constraint: &str) -> bool {
        matches!(self, StoreError::UniqueViolation(name) if name == constraint)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(constraint) => {
                AppError::Conflict(format!("Duplicate value ({})", constraint))
            }
            StoreError::NotFound => AppError::NotFound("Record not found".to_string()),
            StoreError::Unavailable(msg) => AppError::ServiceUnavailable(msg),
            StoreError::Database(e) => AppError::Database(e),
            StoreError::Corrupt(msg) => AppError::Internal(format!("Corrupt record: {}", msg)),
        }
    }
}

/// Outcome of an unlink attempt, decided atomically by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlinkOutcome {
    Removed,
    NotLinked,
    /// The identity is the only way left to sign in
    LastCredential,
}

/// Persistence of users and their linked identities
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UserWithPassword>>;

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserWithPassword>>;

    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<UserWithPassword>>;

    async fn create_user(&self, user: NewUser) -> StoreResult<UserWithPassword>;

    /// Creates the user and its first linked identity in one transaction
    async fn create_user_with_identity(
        &self,
        user: NewUser,
        identity: NewIdentity,
    ) -> StoreResult<(UserWithPassword, LinkedIdentity)>;

    async fn find_identity(
        &self,
        provider: Provider,
        subject: &str,
    ) -> StoreResult<Option<LinkedIdentity>>;

    async fn list_identities(&self, user_id: i64) -> StoreResult<Vec<LinkedIdentity>>;

    async fn insert_identity(
        &self,
        user_id: i64,
        identity: NewIdentity,
    ) -> StoreResult<LinkedIdentity>;

    /// Removes the user's identity for `provider` unless it is the last credential
    async fn remove_identity(&self, user_id: i64, provider: Provider) -> StoreResult<UnlinkOutcome>;

    async fn mark_email_verified(&self, user_id: i64) -> StoreResult<()>;

    async fn update_password_hash(&self, user_id: i64, password_hash: &str) -> StoreResult<()>;

    async fn set_banned(&self, user_id: i64, banned: bool) -> StoreResult<()>;

    /// Sets or clears the soft-delete marker
    async fn set_deleted(&self, user_id: i64, deleted: bool) -> StoreResult<()>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Snapshot of a fixed-window counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterWindow {
    pub count: u64,
    /// Time until the window resets
    pub ttl: Duration,
}

/// Atomic counter with expiry
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments `key`; expiry is set to `window` only when the new count is 1
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<CounterWindow>;

    async fn peek(&self, key: &str) -> StoreResult<Option<CounterWindow>>;

    async fn reset(&self, key: &str) -> StoreResult<()>;
}

/// Result of an atomic consume attempt on a verification code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed,
    Missing,
    Mismatch,
    AlreadyConsumed,
    Expired,
}

/// Expiring verification code records keyed by purpose and target
#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Overwrites any previous record under `key`
    async fn put_code(&self, key: &str, code: &VerificationCode, ttl: Duration)
        -> StoreResult<()>;

    async fn get_code(&self, key: &str) -> StoreResult<Option<VerificationCode>>;

    /// Compare-and-set: marks the record consumed if `code` matches and is live
    async fn consume_code(
        &self,
        key: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ConsumeOutcome>;
}

/// Set-if-absent markers used to make refresh tokens single-use
#[async_trait]
pub trait ReplayGuard: Send + Sync {
    /// Returns `true` the first time `key` is claimed within `ttl`
    async fn claim(&self, key: &str, ttl: Duration) -> StoreResult<bool>;
}
