//! Linked Identity Models
//!
//! External provider identities and their link to a local user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity provider enumeration
///
/// WeChat Mini-Program and WeChat web OAuth both resolve to [`Provider::WeChat`]
/// keyed by `unionid`, so one person gets one account across WeChat surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "wechat")]
    WeChat,
    Google,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::WeChat => "wechat",
            Provider::Google => "google",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wechat" => Ok(Provider::WeChat),
            "google" => Ok(Provider::Google),
            _ => Err(format!("Unknown identity provider: {}", s)),
        }
    }
}

/// Verified identity returned by a provider exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderIdentity {
    pub provider: Provider,

    /// Stable provider subject (`unionid` for WeChat, `sub` for Google)
    pub subject: String,

    /// Per-application identifier (WeChat `openid`)
    pub secondary_subject: Option<String>,

    /// Email as reported by the provider
    pub email: Option<String>,

    pub email_verified: bool,

    pub name: Option<String>,
}

impl ProviderIdentity {
    pub fn new(provider: Provider, subject: impl Into<String>) -> Self {
        Self {
            provider,
            subject: subject.into(),
            secondary_subject: None,
            email: None,
            email_verified: false,
            name: None,
        }
    }

    pub fn with_secondary(mut self, secondary: impl Into<String>) -> Self {
        self.secondary_subject = Some(secondary.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>, verified: bool) -> Self {
        self.email = Some(email.into());
        self.email_verified = verified;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// WeChat Mini-Program identity from gateway-injected headers
    pub fn wechat_mini_program(openid: &str, unionid: &str) -> Self {
        Self::new(Provider::WeChat, unionid).with_secondary(openid)
    }

    pub(crate) fn as_new_identity(&self) -> NewIdentity {
        NewIdentity {
            provider: self.provider,
            subject: self.subject.clone(),
            secondary_subject: self.secondary_subject.clone(),
        }
    }
}

/// Link between a local user and a provider subject
///
/// Unique on `(provider, subject)` and on `(user_id, provider)`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LinkedIdentity {
    pub id: i64,
    pub user_id: i64,
    pub provider: String,
    pub subject: String,
    pub secondary_subject: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LinkedIdentity {
    pub fn provider(&self) -> Option<Provider> {
        self.provider.parse().ok()
    }
}

/// Fields for inserting a linked identity row
#[derive(Debug, Clone, PartialEq)]
pub struct NewIdentity {
    pub provider: Provider,
    pub subject: String,
    pub secondary_subject: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_round_trip_names() {
        assert_eq!(Provider::WeChat.to_string(), "wechat");
        assert_eq!("Google".parse::<Provider>().unwrap(), Provider::Google);
        assert!("github".parse::<Provider>().is_err());
        assert_eq!(
            serde_json::to_string(&Provider::WeChat).unwrap(),
            "\"wechat\""
        );
    }

    #[test]
    fn test_mini_program_identity_is_keyed_by_unionid() {
        let identity = ProviderIdentity::wechat_mini_program("o-openid", "u-unionid");
        assert_eq!(identity.provider, Provider::WeChat);
        assert_eq!(identity.subject, "u-unionid");
        assert_eq!(identity.secondary_subject.as_deref(), Some("o-openid"));
    }
}
