//! OAuth and WeChat Mini-Program Handlers
//!
//! Provider sign-in, Mini-Program register/login and binding of provider
//! identities to the authenticated account.

use axum::{
    body::Bytes,
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use validator::Validate;

use super::handlers::{handle_validation_error, AppState, ValidatedJson};
use super::middleware::AuthUser;
use crate::models::{
    identity::{Provider, ProviderIdentity},
    requests::{LinkedIdentityResponse, OAuthCodeRequest, TokenResponse},
};
use crate::utils::error::{ApiResponse, AppError, AppResult};

/// Header injected by the WeChat cloud gateway with the caller's openid
pub const WX_OPENID_HEADER: &str = "x-wx-openid";

/// Header injected by the WeChat cloud gateway with the caller's unionid
pub const WX_UNIONID_HEADER: &str = "x-wx-unionid";

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Mini-Program identity from gateway headers; both headers are required
pub fn mini_program_identity(headers: &HeaderMap) -> AppResult<ProviderIdentity> {
    match (
        header_value(headers, WX_OPENID_HEADER),
        header_value(headers, WX_UNIONID_HEADER),
    ) {
        (Some(openid), Some(unionid)) => Ok(ProviderIdentity::wechat_mini_program(openid, unionid)),
        _ => Err(AppError::Validation(format!(
            "Headers {} and {} are required",
            WX_OPENID_HEADER, WX_UNIONID_HEADER
        ))),
    }
}

fn has_mini_program_headers(headers: &HeaderMap) -> bool {
    headers.contains_key(WX_OPENID_HEADER) || headers.contains_key(WX_UNIONID_HEADER)
}

fn parse_code_body(body: &Bytes) -> AppResult<OAuthCodeRequest> {
    let request: OAuthCodeRequest = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid request body: {}", e)))?;
    request.validate().map_err(handle_validation_error)?;
    Ok(request)
}

type SignInReply = AppResult<(StatusCode, Json<ApiResponse<TokenResponse>>)>;

fn sign_in_reply(tokens: TokenResponse, is_new_user: bool) -> SignInReply {
    let (status, message) = if is_new_user {
        (StatusCode::CREATED, "Account created")
    } else {
        (StatusCode::OK, "Login successful")
    };
    Ok((
        status,
        Json(ApiResponse::success(message, tokens.with_new_user(is_new_user))),
    ))
}

async fn oauth_exchange(state: &AppState, provider: Provider, code: &str) -> SignInReply {
    let (tokens, is_new_user) = state.auth.oauth_exchange(provider, code).await?;
    sign_in_reply(tokens.into(), is_new_user)
}

/// POST /auth/google/oauth
pub async fn google_oauth(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<OAuthCodeRequest>,
) -> SignInReply {
    oauth_exchange(&state, Provider::Google, &request.code).await
}

/// POST /auth/wechat/oauth
pub async fn wechat_oauth(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<OAuthCodeRequest>,
) -> SignInReply {
    oauth_exchange(&state, Provider::WeChat, &request.code).await
}

/// POST /auth/wechat/mp/register
pub async fn mini_program_register(State(state): State<AppState>, headers: HeaderMap) -> SignInReply {
    let identity = mini_program_identity(&headers)?;
    let (tokens, is_new_user) = state.auth.mini_program_register(&identity).await?;
    sign_in_reply(tokens.into(), is_new_user)
}

/// POST /auth/wechat/mp/login
pub async fn mini_program_login(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<ApiResponse<TokenResponse>>> {
    let identity = mini_program_identity(&headers)?;
    let tokens = state.auth.mini_program_login(&identity).await?;
    Ok(Json(ApiResponse::success("Login successful", tokens.into())))
}

type BindReply = AppResult<(StatusCode, Json<ApiResponse<LinkedIdentityResponse>>)>;

fn bind_reply(link: crate::models::identity::LinkedIdentity) -> BindReply {
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Identity linked", link.into())),
    ))
}

/// POST /auth/google/bind
pub async fn bind_google(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    ValidatedJson(request): ValidatedJson<OAuthCodeRequest>,
) -> BindReply {
    let link = state
        .auth
        .bind_with_code(user.user_id, Provider::Google, &request.code)
        .await?;
    bind_reply(link)
}

/// POST /auth/wechat/bind
///
/// Mini-Program clients send the gateway headers; web clients send `{code}`.
pub async fn bind_wechat(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    headers: HeaderMap,
    body: Bytes,
) -> BindReply {
    let link = if has_mini_program_headers(&headers) {
        let identity = mini_program_identity(&headers)?;
        state.auth.bind_identity(user.user_id, &identity).await?
    } else {
        let request = parse_code_body(&body)?;
        state
            .auth
            .bind_with_code(user.user_id, Provider::WeChat, &request.code)
            .await?
    };
    bind_reply(link)
}

async fn unbind(state: &AppState, user_id: i64, provider: Provider) -> AppResult<Json<ApiResponse<()>>> {
    state.auth.unbind(user_id, provider).await?;
    Ok(Json(ApiResponse::success(
        format!("{} identity unlinked", provider),
        (),
    )))
}

/// DELETE /auth/google/bind
pub async fn unbind_google(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> AppResult<Json<ApiResponse<()>>> {
    unbind(&state, user.user_id, Provider::Google).await
}

/// DELETE /auth/wechat/bind
pub async fn unbind_wechat(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> AppResult<Json<ApiResponse<()>>> {
    unbind(&state, user.user_id, Provider::WeChat).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_mini_program_identity_requires_both_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(WX_OPENID_HEADER, HeaderValue::from_static("o-1"));
        assert!(matches!(
            mini_program_identity(&headers),
            Err(AppError::Validation(_))
        ));

        headers.insert(WX_UNIONID_HEADER, HeaderValue::from_static("  "));
        assert!(mini_program_identity(&headers).is_err());

        headers.insert(WX_UNIONID_HEADER, HeaderValue::from_static("u-1"));
        let identity = mini_program_identity(&headers).unwrap();
        assert_eq!(identity.subject, "u-1");
        assert_eq!(identity.secondary_subject.as_deref(), Some("o-1"));
    }

    #[test]
    fn test_parse_code_body() {
        assert_eq!(
            parse_code_body(&Bytes::from_static(br#"{"code":"abc"}"#))
                .unwrap()
                .code,
            "abc"
        );
        assert!(parse_code_body(&Bytes::from_static(br#"{"code":""}"#)).is_err());
        assert!(parse_code_body(&Bytes::new()).is_err());
    }
}
