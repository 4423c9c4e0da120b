//! OAuth Provider Clients
//!
//! Exchange an authorization code at the provider and return the verified
//! [`ProviderIdentity`]. Google uses the `oauth2` client for the token
//! exchange; WeChat's non-standard `sns` endpoints are called with reqwest.

use std::time::Duration;

use async_trait::async_trait;
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, RedirectUrl,
    RequestTokenError, TokenResponse, TokenUrl,
};
use reqwest::Client as HttpClient;
use thiserror::Error;

use crate::config::{GoogleOAuthConfig, WeChatConfig};
use crate::models::{
    identity::{Provider, ProviderIdentity},
    oauth::{GoogleUserInfo, WeChatTokenResponse, WeChatUserInfo},
};
use crate::utils::error::AppError;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v4/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

const WECHAT_API_BASE: &str = "https://api.weixin.qq.com";

/// WeChat errcodes meaning the code itself is bad or already used
const WECHAT_INVALID_CODE_ERRCODES: [i64; 2] = [40029, 40163];

/// OAuth client errors
#[derive(Error, Debug)]
pub enum OAuthClientError {
    #[error("OAuth configuration error: {0}")]
    Configuration(String),

    /// The provider rejected the authorization code
    #[error("Invalid authorization code: {0}")]
    InvalidCode(String),

    #[error("OAuth provider error: {0}")]
    Provider(String),

    #[error("HTTP request error: {0}")]
    Http(String),

    /// The provider did not return a stable subject
    #[error("Provider identity incomplete: {0}")]
    MissingSubject(String),
}

impl From<OAuthClientError> for AppError {
    fn from(err: OAuthClientError) -> Self {
        match err {
            OAuthClientError::Configuration(msg) => AppError::Configuration(msg),
            OAuthClientError::InvalidCode(msg) => {
                AppError::Authentication(format!("Invalid authorization code: {}", msg))
            }
            OAuthClientError::Provider(msg)
            | OAuthClientError::Http(msg)
            | OAuthClientError::MissingSubject(msg) => AppError::ExternalService(msg),
        }
    }
}

pub type OAuthClientResult<T> = Result<T, OAuthClientError>;

/// Code exchange against one identity provider
#[async_trait]
pub trait OAuthProviderClient: Send + Sync {
    fn provider(&self) -> Provider;

    async fn exchange_code(&self, code: &str) -> OAuthClientResult<ProviderIdentity>;
}

fn http_client(timeout: Duration) -> OAuthClientResult<HttpClient> {
    HttpClient::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| OAuthClientError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// Google OAuth 2.0 authorization code client
pub struct GoogleOAuthClient {
    oauth_client: BasicClient,
    http_client: HttpClient,
}

impl GoogleOAuthClient {
    pub fn new(config: &GoogleOAuthConfig) -> OAuthClientResult<Self> {
        let oauth_client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(GOOGLE_AUTH_URL.to_string()).map_err(|e| {
                OAuthClientError::Configuration(format!("Invalid Google auth URL: {}", e))
            })?,
            Some(TokenUrl::new(GOOGLE_TOKEN_URL.to_string()).map_err(|e| {
                OAuthClientError::Configuration(format!("Invalid Google token URL: {}", e))
            })?),
        )
        .set_redirect_uri(RedirectUrl::new(config.redirect_uri.clone()).map_err(|e| {
            OAuthClientError::Configuration(format!("Invalid redirect URI: {}", e))
        })?);

        Ok(Self {
            oauth_client,
            http_client: http_client(Duration::from_secs(15))?,
        })
    }

    async fn fetch_user_info(&self, access_token: &str) -> OAuthClientResult<GoogleUserInfo> {
        let response = self
            .http_client
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| OAuthClientError::Http(format!("Failed to fetch user info: {}", e)))?;

        if !response.status().is_success() {
            return Err(OAuthClientError::Provider(format!(
                "Google API returned error: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| OAuthClientError::Provider(format!("Failed to parse user info: {}", e)))
    }
}

/// Maps Google's userinfo payload to a provider identity
pub fn google_identity(user_info: GoogleUserInfo) -> OAuthClientResult<ProviderIdentity> {
    if user_info.id.trim().is_empty() {
        return Err(OAuthClientError::MissingSubject(
            "Google user ID missing".to_string(),
        ));
    }

    let mut identity = ProviderIdentity::new(Provider::Google, user_info.id);
    if let Some(email) = user_info.email.filter(|e| !e.trim().is_empty()) {
        identity = identity.with_email(email, user_info.verified_email);
    }
    let name = user_info.name.or_else(|| match (user_info.given_name, user_info.family_name) {
        (Some(given), Some(family)) => Some(format!("{} {}", given, family)),
        (given, family) => given.or(family),
    });
    if let Some(name) = name {
        identity = identity.with_name(name);
    }
    Ok(identity)
}

#[async_trait]
impl OAuthProviderClient for GoogleOAuthClient {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn exchange_code(&self, code: &str) -> OAuthClientResult<ProviderIdentity> {
        let token_response = self
            .oauth_client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(response) => {
                    OAuthClientError::InvalidCode(response.error().to_string())
                }
                other => {
                    log::error!("Google token exchange failed: {}", other);
                    OAuthClientError::Provider(format!("Token exchange failed: {}", other))
                }
            })?;

        let user_info = self
            .fetch_user_info(token_response.access_token().secret())
            .await?;
        google_identity(user_info)
    }
}

/// WeChat Open Platform web OAuth client
pub struct WeChatOAuthClient {
    app_id: String,
    app_secret: String,
    api_base: String,
    http_client: HttpClient,
}

impl WeChatOAuthClient {
    pub fn new(config: &WeChatConfig) -> OAuthClientResult<Self> {
        Ok(Self {
            app_id: config.app_id.clone(),
            app_secret: config.app_secret.clone(),
            api_base: WECHAT_API_BASE.to_string(),
            http_client: http_client(Duration::from_secs(config.request_timeout_seconds))?,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> OAuthClientResult<T> {
        let response = self
            .http_client
            .get(format!("{}{}", self.api_base, path))
            .query(query)
            .send()
            .await
            .map_err(|e| OAuthClientError::Http(format!("WeChat request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(OAuthClientError::Provider(format!(
                "WeChat API returned error: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| OAuthClientError::Provider(format!("Failed to parse WeChat response: {}", e)))
    }

    async fn fetch_user_info(
        &self,
        access_token: &str,
        openid: &str,
    ) -> OAuthClientResult<WeChatUserInfo> {
        self.get_json(
            "/sns/userinfo",
            &[("access_token", access_token), ("openid", openid)],
        )
        .await
    }
}

/// Builds the WeChat identity from the token response, falling back to the
/// userinfo payload when the token response carries no `unionid`
pub fn wechat_identity(
    token: &WeChatTokenResponse,
    user_info: Option<&WeChatUserInfo>,
) -> OAuthClientResult<ProviderIdentity> {
    if let Some(message) = token.error() {
        return Err(match token.errcode {
            Some(code) if WECHAT_INVALID_CODE_ERRCODES.contains(&code) => {
                OAuthClientError::InvalidCode(message)
            }
            _ => OAuthClientError::Provider(message),
        });
    }

    let openid = token
        .openid
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| OAuthClientError::MissingSubject("WeChat openid missing".to_string()))?;

    let unionid = token
        .unionid
        .as_deref()
        .or_else(|| user_info.and_then(|info| info.unionid.as_deref()))
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            OAuthClientError::MissingSubject(
                "WeChat unionid missing; the app must be bound to an Open Platform account"
                    .to_string(),
            )
        })?;

    let mut identity = ProviderIdentity::new(Provider::WeChat, unionid).with_secondary(openid);
    if let Some(nickname) = user_info.and_then(|info| info.nickname.clone()) {
        identity = identity.with_name(nickname);
    }
    Ok(identity)
}

#[async_trait]
impl OAuthProviderClient for WeChatOAuthClient {
    fn provider(&self) -> Provider {
        Provider::WeChat
    }

    async fn exchange_code(&self, code: &str) -> OAuthClientResult<ProviderIdentity> {
        let token: WeChatTokenResponse = self
            .get_json(
                "/sns/oauth2/access_token",
                &[
                    ("appid", self.app_id.as_str()),
                    ("secret", self.app_secret.as_str()),
                    ("code", code),
                    ("grant_type", "authorization_code"),
                ],
            )
            .await?;

        if let Some(message) = token.error() {
            log::warn!("WeChat code exchange rejected: {}", message);
            return wechat_identity(&token, None);
        }

        let user_info = match (&token.unionid, &token.access_token, &token.openid) {
            (None, Some(access_token), Some(openid)) => {
                Some(self.fetch_user_info(access_token, openid).await?)
            }
            _ => None,
        };

        wechat_identity(&token, user_info.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn google_user(id: &str) -> GoogleUserInfo {
        GoogleUserInfo {
            id: id.to_string(),
            email: Some("user@example.com".to_string()),
            verified_email: true,
            name: None,
            given_name: Some("Ada".to_string()),
            family_name: Some("Lovelace".to_string()),
            picture: None,
        }
    }

    #[test]
    fn test_google_identity_mapping() {
        let identity = google_identity(google_user("1234")).unwrap();
        assert_eq!(identity.provider, Provider::Google);
        assert_eq!(identity.subject, "1234");
        assert_eq!(identity.email.as_deref(), Some("user@example.com"));
        assert!(identity.email_verified);
        assert_eq!(identity.name.as_deref(), Some("Ada Lovelace"));

        assert!(matches!(
            google_identity(google_user(" ")),
            Err(OAuthClientError::MissingSubject(_))
        ));
    }

    #[test]
    fn test_wechat_identity_uses_unionid_as_subject() {
        let token = WeChatTokenResponse {
            access_token: Some("token".into()),
            openid: Some("openid-1".into()),
            unionid: Some("unionid-1".into()),
            ..Default::default()
        };

        let identity = wechat_identity(&token, None).unwrap();
        assert_eq!(identity.provider, Provider::WeChat);
        assert_eq!(identity.subject, "unionid-1");
        assert_eq!(identity.secondary_subject.as_deref(), Some("openid-1"));
    }

    #[test]
    fn test_wechat_identity_falls_back_to_userinfo_unionid() {
        let token = WeChatTokenResponse {
            access_token: Some("token".into()),
            openid: Some("openid-2".into()),
            ..Default::default()
        };
        let info = WeChatUserInfo {
            unionid: Some("unionid-2".into()),
            nickname: Some("wx user".into()),
            ..Default::default()
        };

        let identity = wechat_identity(&token, Some(&info)).unwrap();
        assert_eq!(identity.subject, "unionid-2");
        assert_eq!(identity.name.as_deref(), Some("wx user"));

        assert!(matches!(
            wechat_identity(&token, None),
            Err(OAuthClientError::MissingSubject(_))
        ));
    }

    #[test]
    fn test_wechat_errcodes() {
        let invalid = WeChatTokenResponse {
            errcode: Some(40029),
            errmsg: Some("invalid code".into()),
            ..Default::default()
        };
        assert!(matches!(
            wechat_identity(&invalid, None),
            Err(OAuthClientError::InvalidCode(_))
        ));

        let throttled = WeChatTokenResponse {
            errcode: Some(45011),
            errmsg: Some("api minute-quota reach limit".into()),
            ..Default::default()
        };
        assert!(matches!(
            wechat_identity(&throttled, None),
            Err(OAuthClientError::Provider(_))
        ));
    }
}
