//! OAuth Provider Payloads
//!
//! Wire formats returned by Google and WeChat during code exchange.

use serde::{Deserialize, Serialize};

/// Google OAuth user information from the userinfo endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleUserInfo {
    /// Google user ID (stable subject)
    pub id: String,

    pub email: Option<String>,

    #[serde(default)]
    pub verified_email: bool,

    pub name: Option<String>,

    pub given_name: Option<String>,

    pub family_name: Option<String>,

    pub picture: Option<String>,
}

/// Response of `sns/oauth2/access_token` (web flow) and `sns/jscode2session`
///
/// WeChat reports failures in-band with `errcode` and HTTP 200.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WeChatTokenResponse {
    pub access_token: Option<String>,

    pub expires_in: Option<i64>,

    pub openid: Option<String>,

    /// Present when the app is bound to a WeChat Open Platform account
    pub unionid: Option<String>,

    pub scope: Option<String>,

    pub errcode: Option<i64>,

    pub errmsg: Option<String>,
}

impl WeChatTokenResponse {
    pub fn error(&self) -> Option<String> {
        match self.errcode {
            Some(code) if code != 0 => Some(format!(
                "{} ({})",
                self.errmsg.as_deref().unwrap_or("unknown error"),
                code
            )),
            _ => None,
        }
    }
}

/// Response of `sns/userinfo`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WeChatUserInfo {
    pub openid: Option<String>,
    pub unionid: Option<String>,
    pub nickname: Option<String>,
    pub errcode: Option<i64>,
    pub errmsg: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_google_user_info_deserialization() {
        let json = json!({
            "id": "123456789",
            "email": "user@example.com",
            "verified_email": true,
            "name": "John Doe",
            "picture": "https://example.com/photo.jpg"
        });

        let user_info: GoogleUserInfo = serde_json::from_value(json).unwrap();
        assert_eq!(user_info.id, "123456789");
        assert_eq!(user_info.email.as_deref(), Some("user@example.com"));
        assert!(user_info.verified_email);
        assert!(user_info.given_name.is_none());
    }

    #[test]
    fn test_wechat_error_payload() {
        let response: WeChatTokenResponse =
            serde_json::from_value(json!({"errcode": 40029, "errmsg": "invalid code"})).unwrap();
        assert_eq!(response.error().as_deref(), Some("invalid code (40029)"));

        let ok: WeChatTokenResponse = serde_json::from_value(json!({
            "access_token": "at",
            "openid": "o1",
            "unionid": "u1",
            "expires_in": 7200
        }))
        .unwrap();
        assert!(ok.error().is_none());
        assert_eq!(ok.unionid.as_deref(), Some("u1"));
    }
}
