//! OpenID Connect UserInfo Endpoint (RFC 6750 bearer authentication)

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header},
};
use tracing::debug;

use crate::oauth::OAuthState;
use crate::oauth::error::OAuthError;
use crate::oauth::models::{Expiring, UserInfoResponse};

/// Extract the token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

/// GET /oauth/userinfo
///
/// # Response
/// ```json
/// { "sub": "user-1", "name": "Test User", "email": "user@example.com" }
/// ```
pub async fn userinfo_endpoint(
    State(state): State<OAuthState>,
    headers: HeaderMap,
) -> Result<Json<UserInfoResponse>, OAuthError> {
    let token = bearer_token(&headers).ok_or(OAuthError::InvalidToken)?;
    Ok(Json(userinfo(&state, token).await?))
}

/// Resolve a stored, unexpired access token to its user's claims
pub async fn userinfo(state: &OAuthState, token: &str) -> Result<UserInfoResponse, OAuthError> {
    let access = state
        .storage
        .find_access_token(token)
        .await?
        .filter(|record| !record.is_expired())
        .ok_or_else(|| {
            debug!("UserInfo called with unknown or expired token");
            OAuthError::InvalidToken
        })?;

    let user = state
        .storage
        .find_user(&access.user_id)
        .await?
        .ok_or(OAuthError::InvalidToken)?;

    Ok(UserInfoResponse {
        sub: user.id,
        name: user.name,
        email: user.email,
    })
}
