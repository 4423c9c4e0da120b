//! Auth Orchestrator
//!
//! Composes credential verification, identity resolution, verification codes
//! and token issuance into the public sign-in flows.

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{
    auth::TokenPair,
    identity::{LinkedIdentity, Provider, ProviderIdentity},
    requests::{LoginRequest, RegisterRequest},
    user::{AccountStatus, User},
    verification::CodePurpose,
};
use crate::service::{
    identity::{IdentityError, IdentityResolver, PasswordRegistration},
    oauth_service::OAuthProviderClient,
    token::TokenService,
    verification::VerificationCodeService,
};
use crate::store::UserStore;
use crate::utils::error::{AppError, AppResult, IntoAppError};

/// Entry point for every authentication flow
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    identities: IdentityResolver,
    tokens: TokenService,
    codes: VerificationCodeService,
    providers: HashMap<Provider, Arc<dyn OAuthProviderClient>>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        identities: IdentityResolver,
        tokens: TokenService,
        codes: VerificationCodeService,
    ) -> Self {
        Self {
            users,
            identities,
            tokens,
            codes,
            providers: HashMap::new(),
        }
    }

    /// Registers an OAuth client; replaces any client for the same provider
    pub fn with_provider(mut self, client: Arc<dyn OAuthProviderClient>) -> Self {
        self.providers.insert(client.provider(), client);
        self
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Checks the user store is reachable
    pub async fn health(&self) -> AppResult<()> {
        self.users.ping().await?;
        Ok(())
    }

    pub async fn register(&self, request: RegisterRequest) -> AppResult<(User, TokenPair)> {
        let user = self
            .identities
            .register_with_password(PasswordRegistration {
                email: request.email,
                phone: request.phone,
                name: request.name,
                password: request.password,
            })
            .await?;

        let tokens = self.tokens.issue(user.id)?;
        Ok((user, tokens))
    }

    pub async fn login(&self, request: LoginRequest) -> AppResult<TokenPair> {
        let user = self
            .identities
            .resolve_password_login(&request.account, &request.password)
            .await?;

        match user.status() {
            AccountStatus::Active => {}
            AccountStatus::Banned => {
                log::warn!("Login refused for banned user {}", user.id);
                return Err(AppError::AccountUnavailable);
            }
            AccountStatus::Deleted if request.restore => {
                self.identities.restore_account(user.id).await?;
            }
            AccountStatus::Deleted => return Err(AppError::AccountUnavailable),
        }

        log::info!("User {} logged in with password", user.id);
        Ok(self.tokens.issue(user.id)?)
    }

    pub async fn refresh(&self, refresh_token: &str) -> AppResult<TokenPair> {
        Ok(self.tokens.refresh(refresh_token).await?)
    }

    /// Login-or-register with a provider authorization code
    ///
    /// Returns the pair and whether the account was created by this call.
    pub async fn oauth_exchange(
        &self,
        provider: Provider,
        code: &str,
    ) -> AppResult<(TokenPair, bool)> {
        let identity = self.exchange_code(provider, code).await?;
        self.sign_in_identity(&identity).await
    }

    /// Login-or-register with a gateway-asserted Mini-Program identity
    pub async fn mini_program_register(
        &self,
        identity: &ProviderIdentity,
    ) -> AppResult<(TokenPair, bool)> {
        self.sign_in_identity(identity).await
    }

    /// Login with a Mini-Program identity that must already be linked
    pub async fn mini_program_login(&self, identity: &ProviderIdentity) -> AppResult<TokenPair> {
        let user = match self.identities.find_linked_user(identity).await {
            Ok(user) => user,
            Err(IdentityError::UserNotFound) => {
                return Err(AppError::NotFound(
                    "No account is linked to this WeChat identity".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        self.issue_for(&user)
    }

    pub async fn bind_with_code(
        &self,
        user_id: i64,
        provider: Provider,
        code: &str,
    ) -> AppResult<LinkedIdentity> {
        let identity = self.exchange_code(provider, code).await?;
        self.bind_identity(user_id, &identity).await
    }

    pub async fn bind_identity(
        &self,
        user_id: i64,
        identity: &ProviderIdentity,
    ) -> AppResult<LinkedIdentity> {
        Ok(self.identities.link_provider(user_id, identity).await?)
    }

    pub async fn unbind(&self, user_id: i64, provider: Provider) -> AppResult<()> {
        Ok(self.identities.unlink_provider(user_id, provider).await?)
    }

    /// Sends an email verification code if the address belongs to an account
    ///
    /// Always succeeds from the caller's point of view.
    pub async fn send_email_verification(&self, email: &str) -> AppResult<()> {
        match self.identities.find_by_email(email).await? {
            Some(user) if user.email_verified => {
                log::debug!("Email of user {} already verified; no code sent", user.id);
            }
            Some(user) => self.send_code_quietly(CodePurpose::EmailVerify, email, user.id).await,
            None => log::debug!("Email verification requested for unknown address"),
        }
        Ok(())
    }

    pub async fn verify_email(&self, email: &str, code: &str) -> AppResult<()> {
        self.codes
            .verify(CodePurpose::EmailVerify, email, code)
            .await?;

        let user = self.consumed_code_owner(email).await?;
        self.identities
            .mark_email_verified(user.id)
            .await
            .map_err(|e| consumed_code_failure(CodePurpose::EmailVerify, e))?;

        log::info!("Email verified for user {}", user.id);
        Ok(())
    }

    /// Sends a password reset code if the address belongs to an account
    ///
    /// Always succeeds from the caller's point of view.
    pub async fn send_password_reset(&self, email: &str) -> AppResult<()> {
        match self.identities.find_by_email(email).await? {
            Some(user) => {
                self.send_code_quietly(CodePurpose::PasswordReset, email, user.id)
                    .await
            }
            None => log::debug!("Password reset requested for unknown address"),
        }
        Ok(())
    }

    /// Consumes the reset code, then replaces the password hash
    pub async fn confirm_password_reset(
        &self,
        email: &str,
        code: &str,
        new_password: String,
    ) -> AppResult<()> {
        self.codes
            .verify(CodePurpose::PasswordReset, email, code)
            .await?;

        let user = self.consumed_code_owner(email).await?;
        self.identities
            .set_password(user.id, new_password)
            .await
            .map_err(|e| consumed_code_failure(CodePurpose::PasswordReset, e))?;

        log::info!("Password reset completed for user {}", user.id);
        Ok(())
    }

    async fn exchange_code(&self, provider: Provider, code: &str) -> AppResult<ProviderIdentity> {
        let client = self.providers.get(&provider).ok_or_else(|| {
            AppError::NotFound(format!("{} sign-in is not enabled", provider))
        })?;

        client.exchange_code(code).await.map_err(|e| {
            log::warn!("{} code exchange failed: {}", provider, e);
            e.into()
        })
    }

    async fn sign_in_identity(&self, identity: &ProviderIdentity) -> AppResult<(TokenPair, bool)> {
        let (user, is_new_user) = self.identities.resolve_oauth(identity).await?;
        let tokens = self.issue_for(&user)?;
        Ok((tokens, is_new_user))
    }

    fn issue_for(&self, user: &User) -> AppResult<TokenPair> {
        if !user.is_available() {
            log::warn!("Token issuance refused for unavailable user {}", user.id);
            return Err(AppError::AccountUnavailable);
        }
        Ok(self.tokens.issue(user.id)?)
    }

    async fn send_code_quietly(&self, purpose: CodePurpose, email: &str, user_id: i64) {
        if let Err(e) = self.codes.issue(purpose, email).await {
            log::error!("Failed to issue {} code for user {}: {}", purpose, user_id, e);
        }
    }

    async fn consumed_code_owner(&self, email: &str) -> AppResult<User> {
        self.identities
            .find_by_email(email)
            .await
            .into_app_error("Failed to load account after code use")?
            .ok_or_else(|| AppError::Internal("Account vanished after code use".to_string()))
    }
}

fn consumed_code_failure(purpose: CodePurpose, err: IdentityError) -> AppError {
    log::error!("{} code consumed but update failed: {}", purpose, err);
    AppError::Internal(format!("{} update failed; request a new code", purpose))
}
