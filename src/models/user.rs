//! User Model
//!
//! Canonical user identity and its storage representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User representation for external API responses
///
/// Never carries the password hash. All timestamps are UTC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// Numeric user identifier
    pub id: i64,

    /// Normalized email address, if the account has one
    pub email: Option<String>,

    /// Normalized phone number, if the account has one
    pub phone: Option<String>,

    /// Optional display name
    pub name: Option<String>,

    /// Whether the email address has been verified
    pub email_verified: bool,

    /// Whether the account can sign in with a password
    pub has_password: bool,

    pub banned: bool,

    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn status(&self) -> AccountStatus {
        AccountStatus::of(self.banned, self.deleted_at)
    }

    /// Banned and soft-deleted accounts cannot receive tokens
    pub fn is_available(&self) -> bool {
        self.status() == AccountStatus::Active
    }
}

/// Coarse account state used by login and refresh decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Banned,
    Deleted,
}

impl AccountStatus {
    fn of(banned: bool, deleted_at: Option<DateTime<Utc>>) -> Self {
        if banned {
            AccountStatus::Banned
        } else if deleted_at.is_some() {
            AccountStatus::Deleted
        } else {
            AccountStatus::Active
        }
    }
}

/// Storage representation including the password hash
///
/// Returned by user stores and consumed by the identity resolver. Converted to
/// [`User`] before leaving the service layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserWithPassword {
    pub id: i64,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,

    /// bcrypt hash; absent for provider-only accounts
    pub password_hash: Option<String>,

    pub email_verified: bool,
    pub banned: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserWithPassword {
    pub fn status(&self) -> AccountStatus {
        AccountStatus::of(self.banned, self.deleted_at)
    }
}

impl From<UserWithPassword> for User {
    fn from(record: UserWithPassword) -> Self {
        User {
            id: record.id,
            email: record.email,
            phone: record.phone,
            name: record.name,
            email_verified: record.email_verified,
            has_password: record.password_hash.is_some(),
            banned: record.banned,
            deleted_at: record.deleted_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Fields for inserting a user row
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub email_verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> UserWithPassword {
        UserWithPassword {
            id: 7,
            email: Some("test@example.com".to_string()),
            phone: None,
            name: Some("Test User".to_string()),
            password_hash: Some("hashed_password".to_string()),
            email_verified: true,
            banned: false,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_user_with_password_conversion() {
        let user: User = record().into();

        assert_eq!(user.id, 7);
        assert_eq!(user.email.as_deref(), Some("test@example.com"));
        assert!(user.has_password);
        assert!(user.is_available());
    }

    #[test]
    fn test_account_status() {
        let mut banned = record();
        banned.banned = true;
        banned.deleted_at = Some(Utc::now());
        assert_eq!(banned.status(), AccountStatus::Banned);

        let mut deleted = record();
        deleted.deleted_at = Some(Utc::now());
        let user: User = deleted.into();
        assert_eq!(user.status(), AccountStatus::Deleted);
        assert!(!user.is_available());
    }
}
