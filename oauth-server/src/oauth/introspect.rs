//! Token Introspection (RFC 7662) and Revocation (RFC 7009)
//!
//! Both endpoints authenticate the calling client first. Neither ever tells
//! a caller *why* a token is unusable: unknown, expired and malformed tokens
//! all introspect as `{"active": false}`, and revocation always succeeds.

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::oauth::OAuthState;
use crate::oauth::clients::ClientCredentials;
use crate::oauth::error::OAuthError;
use crate::oauth::models::{
    AccessToken, Expiring, IntrospectionResponse, OAuthClient, RefreshToken, TokenActionForm,
    TokenTypeHint, non_empty,
};

/// POST /oauth/introspect
///
/// # Form Parameters
/// - `token`: The token to inspect
/// - `token_type_hint`: (Optional) `access_token` or `refresh_token`
/// - `client_id`, `client_secret`: Caller credentials (or HTTP Basic)
///
/// # Response
/// ```json
/// {
///   "active": true,
///   "scope": "openid profile",
///   "client_id": "c1",
///   "token_type": "Bearer",
///   "exp": 1700000900,
///   "iat": 1700000000,
///   "sub": "user-1",
///   "username": "user@example.com"
/// }
/// ```
pub async fn introspect_endpoint(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    form: Result<Form<TokenActionForm>, FormRejection>,
) -> Result<Json<IntrospectionResponse>, OAuthError> {
    let Form(form) = form?;
    let client = authenticate_caller(&state, &form, &headers).await?;
    let hint = TokenTypeHint::parse(form.token_type_hint.as_deref());

    let Some(token) = non_empty(form.token) else {
        return Ok(Json(IntrospectionResponse::inactive()));
    };

    let response = introspect(&state, &token, hint).await?;
    debug!(client_id = %client.client_id, active = response.active, "Token introspected");
    Ok(Json(response))
}

/// POST /oauth/revoke
///
/// Always answers `200` with an empty body once the client is authenticated.
pub async fn revoke_endpoint(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    form: Result<Form<TokenActionForm>, FormRejection>,
) -> Result<StatusCode, OAuthError> {
    let Form(form) = form?;
    let client = authenticate_caller(&state, &form, &headers).await?;
    let hint = TokenTypeHint::parse(form.token_type_hint.as_deref());

    let token =
        non_empty(form.token).ok_or_else(|| OAuthError::invalid_request("token is required"))?;

    revoke(&state, &client, &token, hint).await?;
    Ok(StatusCode::OK)
}

async fn authenticate_caller(
    state: &OAuthState,
    form: &TokenActionForm,
    headers: &HeaderMap,
) -> Result<OAuthClient, OAuthError> {
    let credentials = ClientCredentials::from_request(
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
        headers,
    );
    state.clients.authenticate(credentials).await
}

/// Fields shared by both token kinds
struct TokenRecordView {
    token_type: &'static str,
    scope: String,
    client_id: String,
    user_id: String,
    expires_at: DateTime<Utc>,
    issued_at: DateTime<Utc>,
}

impl From<AccessToken> for TokenRecordView {
    fn from(record: AccessToken) -> Self {
        Self {
            token_type: "Bearer",
            scope: record.scope,
            client_id: record.client_id,
            user_id: record.user_id,
            expires_at: record.expires_at,
            issued_at: record.issued_at,
        }
    }
}

impl From<RefreshToken> for TokenRecordView {
    fn from(record: RefreshToken) -> Self {
        Self {
            token_type: "refresh_token",
            scope: record.scope,
            client_id: record.client_id,
            user_id: record.user_id,
            expires_at: record.expires_at,
            issued_at: record.issued_at,
        }
    }
}

impl Expiring for TokenRecordView {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Look the token up, hinted kind first, and describe it
pub async fn introspect(
    state: &OAuthState,
    token: &str,
    hint: Option<TokenTypeHint>,
) -> Result<IntrospectionResponse, OAuthError> {
    let order = match hint {
        Some(TokenTypeHint::AccessToken) => [TokenTypeHint::AccessToken, TokenTypeHint::RefreshToken],
        Some(TokenTypeHint::RefreshToken) | None => {
            [TokenTypeHint::RefreshToken, TokenTypeHint::AccessToken]
        }
    };

    for kind in order {
        let found = match kind {
            TokenTypeHint::RefreshToken => state
                .storage
                .find_refresh_token(token)
                .await?
                .map(TokenRecordView::from),
            TokenTypeHint::AccessToken => state
                .storage
                .find_access_token(token)
                .await?
                .map(TokenRecordView::from),
        };

        let Some(view) = found else {
            continue;
        };
        if view.is_expired() {
            return Ok(IntrospectionResponse::inactive());
        }

        let username = state
            .storage
            .find_user(&view.user_id)
            .await?
            .map(|user| user.email);

        return Ok(IntrospectionResponse {
            active: true,
            scope: Some(view.scope),
            client_id: Some(view.client_id),
            token_type: Some(view.token_type.to_string()),
            exp: Some(view.expires_at.timestamp()),
            iat: Some(view.issued_at.timestamp()),
            sub: Some(view.user_id),
            username,
        });
    }

    Ok(IntrospectionResponse::inactive())
}

/// Delete the token if it belongs to `client`. Returns whether anything was removed.
pub async fn revoke(
    state: &OAuthState,
    client: &OAuthClient,
    token: &str,
    hint: Option<TokenTypeHint>,
) -> Result<bool, OAuthError> {
    let mut revoked = false;

    if hint != Some(TokenTypeHint::AccessToken) {
        revoked = state
            .storage
            .delete_refresh_token(token, &client.client_id)
            .await?;
    }
    if !revoked && hint != Some(TokenTypeHint::RefreshToken) {
        revoked = state
            .storage
            .delete_access_token(token, &client.client_id)
            .await?;
    }

    if revoked {
        info!(client_id = %client.client_id, "Token revoked");
    } else {
        debug!(client_id = %client.client_id, "Revocation matched no token");
    }
    Ok(revoked)
}
