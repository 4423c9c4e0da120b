//! Identity Resolver
//!
//! Maps a credential proof (password or provider identity) to exactly one
//! local user, and manages linking and unlinking of provider identities.

use std::sync::Arc;

use thiserror::Error;

use crate::models::{
    identity::{LinkedIdentity, Provider, ProviderIdentity},
    user::{AccountStatus, NewUser, User, UserWithPassword},
};
use crate::store::{constraints, StoreError, UnlinkOutcome, UserStore};
use crate::utils::{
    error::AppError,
    security::{hash_password_with_cost, verify_password, DEFAULT_BCRYPT_COST},
    validation::{is_email_identifier, normalize_email, normalize_phone},
};

/// Identity resolution errors
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Phone number already exists")]
    PhoneAlreadyExists,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("Account unavailable")]
    AccountUnavailable,

    #[error("Identity is linked to another account")]
    AlreadyLinkedToOther,

    #[error("Identity is already linked to this account")]
    AlreadyLinkedToSelf,

    #[error("Account already has a {0} identity")]
    ProviderAlreadyBound(Provider),

    #[error("No linked {0} identity")]
    NoSuchLink(Provider),

    #[error("Cannot remove the last credential")]
    WouldRemoveLastCredential,

    #[error("Password hashing error: {0}")]
    Hashing(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::EmailAlreadyExists => {
                AppError::Conflict("Email already exists".to_string())
            }
            IdentityError::PhoneAlreadyExists => {
                AppError::Conflict("Phone number already exists".to_string())
            }
            IdentityError::InvalidCredentials => AppError::InvalidCredentials,
            IdentityError::UserNotFound => AppError::NotFound("User not found".to_string()),
            IdentityError::AccountUnavailable => AppError::AccountUnavailable,
            IdentityError::AlreadyLinkedToOther => AppError::AlreadyLinkedToOther,
            IdentityError::AlreadyLinkedToSelf => AppError::AlreadyLinkedToSelf,
            IdentityError::ProviderAlreadyBound(p) => AppError::ProviderAlreadyBound(p.to_string()),
            IdentityError::NoSuchLink(p) => AppError::NoSuchLink(p.to_string()),
            IdentityError::WouldRemoveLastCredential => AppError::WouldRemoveLastCredential,
            IdentityError::Hashing(msg) => AppError::Internal(msg),
            IdentityError::Store(e) => e.into(),
        }
    }
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// Input for password registration, already validated at the edge
#[derive(Debug, Clone, Default)]
pub struct PasswordRegistration {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
    pub password: String,
}

/// Resolves credentials to users over a [`UserStore`]
#[derive(Clone)]
pub struct IdentityResolver {
    users: Arc<dyn UserStore>,

    /// bcrypt cost factor for password hashing
    bcrypt_cost: u32,
}

impl IdentityResolver {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self {
            users,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }

    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    pub async fn register_with_password(
        &self,
        registration: PasswordRegistration,
    ) -> IdentityResult<User> {
        let email = registration
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty());
        let phone = registration
            .phone
            .as_deref()
            .map(normalize_phone)
            .filter(|p| !p.is_empty());

        if let Some(email) = &email {
            if self.users.find_by_email(email).await?.is_some() {
                return Err(IdentityError::EmailAlreadyExists);
            }
        }
        if let Some(phone) = &phone {
            if self.users.find_by_phone(phone).await?.is_some() {
                return Err(IdentityError::PhoneAlreadyExists);
            }
        }

        let password_hash = self.hash_password(registration.password).await?;

        let record = self
            .users
            .create_user(NewUser {
                email,
                phone,
                name: registration.name.map(|n| n.trim().to_string()),
                password_hash: Some(password_hash),
                email_verified: false,
            })
            .await
            .map_err(|e| {
                // Lost a race with a concurrent registration
                if e.is_unique_violation(constraints::USERS_EMAIL) {
                    IdentityError::EmailAlreadyExists
                } else if e.is_unique_violation(constraints::USERS_PHONE) {
                    IdentityError::PhoneAlreadyExists
                } else {
                    IdentityError::Store(e)
                }
            })?;

        log::info!("Registered user {} with password", record.id);
        Ok(record.into())
    }

    /// Resolves an email or phone plus password to a user
    ///
    /// Account status is not checked here; callers decide how banned and
    /// soft-deleted accounts are handled.
    pub async fn resolve_password_login(
        &self,
        account: &str,
        password: &str,
    ) -> IdentityResult<User> {
        let record = if is_email_identifier(account) {
            self.users.find_by_email(&normalize_email(account)).await?
        } else {
            self.users.find_by_phone(&normalize_phone(account)).await?
        };

        let Some(record) = record else {
            return Err(IdentityError::InvalidCredentials);
        };
        let Some(hash) = record.password_hash.clone() else {
            return Err(IdentityError::InvalidCredentials);
        };

        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| IdentityError::Hashing(e.to_string()))?
            .map_err(|e| IdentityError::Hashing(e.to_string()))?;

        if !matches {
            return Err(IdentityError::InvalidCredentials);
        }

        Ok(record.into())
    }

    /// Login-or-register for a verified provider identity
    ///
    /// Returns the owning user and whether it was created by this call. Never
    /// merges accounts by email.
    pub async fn resolve_oauth(&self, identity: &ProviderIdentity) -> IdentityResult<(User, bool)> {
        if let Some(user) = self.owner_of(identity).await? {
            return Ok((user, false));
        }

        let email = match identity.email.as_deref().map(normalize_email) {
            Some(email) if !email.is_empty() => {
                if self.users.find_by_email(&email).await?.is_some() {
                    log::info!(
                        "Provider email already belongs to another account; creating {} user without email",
                        identity.provider
                    );
                    None
                } else {
                    Some(email)
                }
            }
            _ => None,
        };
        let email_verified = email.is_some() && identity.email_verified;

        let mut new_user = NewUser {
            email,
            phone: None,
            name: identity.name.clone(),
            password_hash: None,
            email_verified,
        };

        loop {
            match self
                .users
                .create_user_with_identity(new_user.clone(), identity.as_new_identity())
                .await
            {
                Ok((record, _link)) => {
                    log::info!("Created user {} via {}", record.id, identity.provider);
                    return Ok((record.into(), true));
                }
                Err(e) if e.is_unique_violation(constraints::IDENTITY_SUBJECT) => {
                    // A concurrent request created the link first
                    return self
                        .owner_of(identity)
                        .await?
                        .map(|user| (user, false))
                        .ok_or(IdentityError::Store(e));
                }
                Err(e)
                    if e.is_unique_violation(constraints::USERS_EMAIL)
                        && new_user.email.is_some() =>
                {
                    // Email claimed between the check and the insert, possibly by
                    // a concurrent sign-in for this same identity
                    if let Some(user) = self.owner_of(identity).await? {
                        return Ok((user, false));
                    }
                    new_user.email = None;
                    new_user.email_verified = false;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Resolves an existing link without creating anything
    pub async fn find_linked_user(&self, identity: &ProviderIdentity) -> IdentityResult<User> {
        self.owner_of(identity)
            .await?
            .ok_or(IdentityError::UserNotFound)
    }

    pub async fn link_provider(
        &self,
        user_id: i64,
        identity: &ProviderIdentity,
    ) -> IdentityResult<LinkedIdentity> {
        self.require_available(user_id).await?;

        if let Some(existing) = self
            .users
            .find_identity(identity.provider, &identity.subject)
            .await?
        {
            return Err(if existing.user_id == user_id {
                IdentityError::AlreadyLinkedToSelf
            } else {
                IdentityError::AlreadyLinkedToOther
            });
        }

        let link = self
            .users
            .insert_identity(user_id, identity.as_new_identity())
            .await
            .map_err(|e| {
                if e.is_unique_violation(constraints::IDENTITY_SUBJECT) {
                    IdentityError::AlreadyLinkedToOther
                } else if e.is_unique_violation(constraints::IDENTITY_USER_PROVIDER) {
                    IdentityError::ProviderAlreadyBound(identity.provider)
                } else {
                    IdentityError::Store(e)
                }
            })?;

        log::info!("Linked {} identity to user {}", identity.provider, user_id);
        Ok(link)
    }

    pub async fn unlink_provider(&self, user_id: i64, provider: Provider) -> IdentityResult<()> {
        self.require_available(user_id).await?;

        match self.users.remove_identity(user_id, provider).await {
            Ok(UnlinkOutcome::Removed) => {
                log::info!("Unlinked {} identity from user {}", provider, user_id);
                Ok(())
            }
            Ok(UnlinkOutcome::NotLinked) => Err(IdentityError::NoSuchLink(provider)),
            Ok(UnlinkOutcome::LastCredential) => Err(IdentityError::WouldRemoveLastCredential),
            Err(StoreError::NotFound) => Err(IdentityError::UserNotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_user(&self, user_id: i64) -> IdentityResult<Option<User>> {
        Ok(self.users.find_by_id(user_id).await?.map(User::from))
    }

    pub async fn find_by_email(&self, email: &str) -> IdentityResult<Option<User>> {
        Ok(self
            .users
            .find_by_email(&normalize_email(email))
            .await?
            .map(User::from))
    }

    /// Clears the soft-delete marker
    pub async fn restore_account(&self, user_id: i64) -> IdentityResult<()> {
        self.users.set_deleted(user_id, false).await?;
        log::info!("Restored soft-deleted user {}", user_id);
        Ok(())
    }

    pub async fn mark_email_verified(&self, user_id: i64) -> IdentityResult<()> {
        self.users.mark_email_verified(user_id).await?;
        Ok(())
    }

    pub async fn set_password(&self, user_id: i64, password: String) -> IdentityResult<()> {
        let hash = self.hash_password(password).await?;
        self.users.update_password_hash(user_id, &hash).await?;
        Ok(())
    }

    async fn owner_of(&self, identity: &ProviderIdentity) -> IdentityResult<Option<User>> {
        let Some(link) = self
            .users
            .find_identity(identity.provider, &identity.subject)
            .await?
        else {
            return Ok(None);
        };

        self.users
            .find_by_id(link.user_id)
            .await?
            .map(|record| Some(record.into()))
            .ok_or(IdentityError::UserNotFound)
    }

    async fn require_available(&self, user_id: i64) -> IdentityResult<UserWithPassword> {
        let record = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(IdentityError::UserNotFound)?;

        match record.status() {
            AccountStatus::Active => Ok(record),
            AccountStatus::Banned | AccountStatus::Deleted => {
                Err(IdentityError::AccountUnavailable)
            }
        }
    }

    async fn hash_password(&self, password: String) -> IdentityResult<String> {
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || hash_password_with_cost(&password, cost))
            .await
            .map_err(|e| IdentityError::Hashing(e.to_string()))?
            .map_err(|e| IdentityError::Hashing(e.to_string()))
    }
}
