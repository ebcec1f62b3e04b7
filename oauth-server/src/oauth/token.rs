//! Token Endpoint
//!
//! Exchanges authorization codes and refresh tokens for a new token pair.
//! Every check runs against a plain read first; the credential is then
//! consumed with an atomic take, and losing that race is `invalid_grant`.

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::crypto::generate_secure_token;
use crate::oauth::OAuthState;
use crate::oauth::clients::ClientCredentials;
use crate::oauth::error::OAuthError;
use crate::oauth::models::{
    AccessToken, Expiring, IdTokenClaims, RefreshToken, TokenRequest, TokenRequestForm,
    TokenResponse, User, scope_includes_openid,
};
use crate::oauth::pkce::{CodeChallengeMethod, verify_pkce};

/// POST /oauth/token - Exchange authorization code or refresh token for tokens
///
/// Supports two grant types:
/// 1. `authorization_code` - Exchange auth code for tokens (with PKCE verification)
/// 2. `refresh_token` - Rotate a refresh token
///
/// Confidential clients must authenticate (form body or HTTP Basic). Public
/// clients may omit credentials; whenever a secret is presented it must
/// authenticate the `client_id` of the request.
///
/// # Authorization Code Grant
/// ```text
/// grant_type=authorization_code&code=...&redirect_uri=https://app/cb&client_id=c1&code_verifier=...
/// ```
///
/// # Refresh Token Grant
/// ```text
/// grant_type=refresh_token&refresh_token=...&client_id=c1
/// ```
///
/// # Response
/// ```json
/// {
///   "access_token": "opaque_token",
///   "token_type": "Bearer",
///   "expires_in": 900,
///   "refresh_token": "new_refresh_token",
///   "scope": "openid profile",
///   "id_token": "eyJ..."
/// }
/// ```
pub async fn token_endpoint(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequestForm>, FormRejection>,
) -> Result<Response, OAuthError> {
    let Form(mut form) = form?;
    let credentials = ClientCredentials::from_request(
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
        &headers,
    );
    // Basic-only callers may leave client_id out of the body
    if form.client_id.is_none() {
        form.client_id = credentials.as_ref().map(|c| c.client_id.clone());
    }

    let request = TokenRequest::try_from(form)?;

    match credentials {
        Some(credentials) => {
            let client = state
                .clients
                .authenticate_client(&credentials.client_id, &credentials.client_secret)
                .await?;
            if client.client_id != request.client_id() {
                warn!(client_id = %client.client_id, "Authenticated client does not match request");
                return Err(OAuthError::InvalidClient);
            }
        }
        None => {
            let client = state.clients.find_client(request.client_id()).await?;
            if client.is_some_and(|client| client.is_confidential) {
                warn!(client_id = %request.client_id(), "Confidential client sent no credentials");
                return Err(OAuthError::InvalidClient);
            }
        }
    }

    let response = exchange(&state, request).await?;

    Ok((
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(response),
    )
        .into_response())
}

/// Dispatch a validated token request to its grant
pub async fn exchange(state: &OAuthState, request: TokenRequest) -> Result<TokenResponse, OAuthError> {
    match request {
        TokenRequest::AuthorizationCode {
            code,
            redirect_uri,
            client_id,
            code_verifier,
        } => {
            redeem_authorization_code(
                state,
                &code,
                &redirect_uri,
                &client_id,
                code_verifier.as_deref(),
            )
            .await
        }
        TokenRequest::RefreshToken {
            refresh_token,
            client_id,
        } => rotate_refresh_token(state, &refresh_token, &client_id).await,
    }
}

/// Handle authorization_code grant type
pub async fn redeem_authorization_code(
    state: &OAuthState,
    code: &str,
    redirect_uri: &str,
    client_id: &str,
    code_verifier: Option<&str>,
) -> Result<TokenResponse, OAuthError> {
    let Some(record) = state.storage.find_authorization_code(code).await? else {
        warn!(client_id = %client_id, "Unknown authorization code");
        return Err(OAuthError::InvalidGrant);
    };

    if record.is_expired() || record.client_id != client_id || record.redirect_uri != redirect_uri
    {
        warn!(client_id = %client_id, "Authorization code rejected");
        return Err(OAuthError::InvalidGrant);
    }

    if let Some(challenge) = &record.code_challenge {
        let verifier =
            code_verifier.ok_or_else(|| OAuthError::invalid_request("code_verifier is required"))?;
        let method = record
            .code_challenge_method
            .unwrap_or(CodeChallengeMethod::S256);
        if !verify_pkce(method, verifier, challenge) {
            warn!(client_id = %client_id, "PKCE verification failed");
            return Err(OAuthError::InvalidGrant);
        }
    }

    require_client(state, client_id).await?;

    let user = state
        .storage
        .find_user(&record.user_id)
        .await?
        .ok_or_else(|| OAuthError::server_error("User bound to authorization code not found"))?;

    // Exactly one concurrent redeemer gets the record back
    let Some(record) = state.storage.take_authorization_code(code).await? else {
        warn!(client_id = %client_id, "Authorization code already consumed");
        return Err(OAuthError::InvalidGrant);
    };

    let id_token = if scope_includes_openid(&record.scope) {
        Some(mint_id_token(
            state,
            &user,
            &record.client_id,
            record.nonce.clone(),
            Utc::now(),
        )?)
    } else {
        None
    };

    let response = issue_token_pair(
        state,
        &record.client_id,
        &record.user_id,
        &record.scope,
        id_token,
    )
    .await?;

    info!(
        client_id = %record.client_id,
        grant_type = "authorization_code",
        id_token = response.id_token.is_some(),
        "Tokens issued"
    );
    Ok(response)
}

/// Handle refresh_token grant type (rotation: the presented token dies)
pub async fn rotate_refresh_token(
    state: &OAuthState,
    refresh_token: &str,
    client_id: &str,
) -> Result<TokenResponse, OAuthError> {
    let record = state
        .storage
        .find_refresh_token(refresh_token)
        .await?
        .filter(|record| record.client_id == client_id && !record.is_expired());
    if record.is_none() {
        warn!(client_id = %client_id, "Refresh token rejected");
        return Err(OAuthError::InvalidGrant);
    }
    require_client(state, client_id).await?;

    let Some(record) = state
        .storage
        .take_refresh_token(refresh_token, client_id)
        .await?
    else {
        warn!(client_id = %client_id, "Refresh token already rotated");
        return Err(OAuthError::InvalidGrant);
    };

    let response =
        issue_token_pair(state, &record.client_id, &record.user_id, &record.scope, None).await?;

    info!(client_id = %record.client_id, grant_type = "refresh_token", "Tokens issued");
    Ok(response)
}

/// Grants of a deleted client are dead even if a record outlived the purge
async fn require_client(state: &OAuthState, client_id: &str) -> Result<(), OAuthError> {
    if state.clients.find_client(client_id).await?.is_none() {
        warn!(client_id = %client_id, "Grant presented for unknown client");
        return Err(OAuthError::InvalidGrant);
    }
    Ok(())
}

/// Persist a fresh access/refresh pair and build the response
async fn issue_token_pair(
    state: &OAuthState,
    client_id: &str,
    user_id: &str,
    scope: &str,
    id_token: Option<String>,
) -> Result<TokenResponse, OAuthError> {
    let now = Utc::now();
    let access = AccessToken {
        token: generate_secure_token(),
        client_id: client_id.to_string(),
        user_id: user_id.to_string(),
        scope: scope.to_string(),
        expires_at: now + state.config.access_token_ttl(),
        issued_at: now,
    };
    let refresh = RefreshToken {
        token: generate_secure_token(),
        client_id: client_id.to_string(),
        user_id: user_id.to_string(),
        scope: scope.to_string(),
        expires_at: now + state.config.refresh_token_ttl(),
        issued_at: now,
    };

    state.storage.save_token_pair(&access, &refresh).await?;

    Ok(TokenResponse {
        access_token: access.token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.access_token_ttl_secs,
        refresh_token: refresh.token,
        scope: scope.to_string(),
        id_token,
    })
}

/// Sign an OpenID Connect ID token for `user`
pub fn mint_id_token(
    state: &OAuthState,
    user: &User,
    client_id: &str,
    nonce: Option<String>,
    issued_at: DateTime<Utc>,
) -> Result<String, OAuthError> {
    let claims = IdTokenClaims {
        iss: state.config.issuer.clone(),
        sub: user.id.clone(),
        aud: client_id.to_string(),
        iat: issued_at.timestamp(),
        exp: (issued_at + state.config.id_token_ttl()).timestamp(),
        nonce,
        name: user.name.clone(),
        email: user.email.clone(),
    };
    Ok(state.keys.sign(&claims)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::models::AuthorizationCode;
    use crate::oauth::pkce::s256_challenge;
    use crate::oauth::test_support::{CLIENT_ID, REDIRECT_URI, USER_ID, seeded_state};
    use chrono::Duration;
    use jsonwebtoken::{Algorithm, DecodingKey, Validation};

    async fn store_code(state: &OAuthState, code: &str, scope: &str, challenge: Option<&str>) {
        let now = Utc::now();
        state
            .storage
            .save_authorization_code(&AuthorizationCode {
                code: code.to_string(),
                client_id: CLIENT_ID.to_string(),
                user_id: USER_ID.to_string(),
                redirect_uri: REDIRECT_URI.to_string(),
                scope: scope.to_string(),
                code_challenge: challenge.map(str::to_string),
                code_challenge_method: challenge.map(|_| CodeChallengeMethod::S256),
                nonce: Some("n-1".to_string()),
                expires_at: now + Duration::minutes(10),
                created_at: now,
            })
            .await
            .unwrap();
    }

    fn decode_id_token(state: &OAuthState, token: &str) -> IdTokenClaims {
        let jwk = state.keys.public_jwk();
        let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e).unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[CLIENT_ID]);
        jsonwebtoken::decode::<IdTokenClaims>(token, &key, &validation)
            .unwrap()
            .claims
    }

    #[tokio::test]
    async fn test_code_exchange_with_pkce() {
        let state = seeded_state().await;
        store_code(&state, "code-1", "openid profile", Some(s256_challenge("verifier123").as_str())).await;

        let response =
            redeem_authorization_code(&state, "code-1", REDIRECT_URI, CLIENT_ID, Some("verifier123"))
                .await
                .unwrap();

        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_in, 900);
        assert_eq!(response.scope, "openid profile");

        let claims = decode_id_token(&state, response.id_token.as_deref().unwrap());
        assert_eq!(claims.sub, USER_ID);
        assert_eq!(claims.aud, CLIENT_ID);
        assert_eq!(claims.iss, "http://localhost:3001");
        assert_eq!(claims.nonce.as_deref(), Some("n-1"));
        assert_eq!(claims.email, "user@example.com");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let state = seeded_state().await;
        store_code(&state, "code-1", "profile", None).await;

        assert!(
            redeem_authorization_code(&state, "code-1", REDIRECT_URI, CLIENT_ID, None)
                .await
                .is_ok()
        );
        let err = redeem_authorization_code(&state, "code-1", REDIRECT_URI, CLIENT_ID, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::InvalidGrant));
    }

    #[tokio::test]
    async fn test_no_id_token_without_openid() {
        let state = seeded_state().await;
        store_code(&state, "code-1", "profile", None).await;

        let response = redeem_authorization_code(&state, "code-1", REDIRECT_URI, CLIENT_ID, None)
            .await
            .unwrap();
        assert!(response.id_token.is_none());
    }

    #[tokio::test]
    async fn test_pkce_failures() {
        let state = seeded_state().await;
        store_code(&state, "code-1", "profile", Some(s256_challenge("verifier123").as_str())).await;

        let missing = redeem_authorization_code(&state, "code-1", REDIRECT_URI, CLIENT_ID, None)
            .await
            .unwrap_err();
        assert_eq!(missing.error_code(), "invalid_request");

        let wrong =
            redeem_authorization_code(&state, "code-1", REDIRECT_URI, CLIENT_ID, Some("other"))
                .await
                .unwrap_err();
        assert!(matches!(wrong, OAuthError::InvalidGrant));

        // Failed attempts do not consume the code
        assert!(
            redeem_authorization_code(&state, "code-1", REDIRECT_URI, CLIENT_ID, Some("verifier123"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_mismatched_binding_is_invalid_grant() {
        let state = seeded_state().await;
        store_code(&state, "code-1", "profile", None).await;

        let wrong_redirect =
            redeem_authorization_code(&state, "code-1", "https://app/other", CLIENT_ID, None)
                .await
                .unwrap_err();
        let wrong_client =
            redeem_authorization_code(&state, "code-1", REDIRECT_URI, "c2", None)
                .await
                .unwrap_err();

        assert!(matches!(wrong_redirect, OAuthError::InvalidGrant));
        assert!(matches!(wrong_client, OAuthError::InvalidGrant));
        assert_eq!(
            wrong_redirect.error_description(),
            wrong_client.error_description()
        );
    }

    #[tokio::test]
    async fn test_expired_code_rejected() {
        let state = seeded_state().await;
        let now = Utc::now();
        state
            .storage
            .save_authorization_code(&AuthorizationCode {
                code: "old".to_string(),
                client_id: CLIENT_ID.to_string(),
                user_id: USER_ID.to_string(),
                redirect_uri: REDIRECT_URI.to_string(),
                scope: "profile".to_string(),
                code_challenge: None,
                code_challenge_method: None,
                nonce: None,
                expires_at: now - Duration::seconds(1),
                created_at: now - Duration::minutes(11),
            })
            .await
            .unwrap();

        assert!(matches!(
            redeem_authorization_code(&state, "old", REDIRECT_URI, CLIENT_ID, None).await,
            Err(OAuthError::InvalidGrant)
        ));
    }

    #[tokio::test]
    async fn test_refresh_rotation() {
        let state = seeded_state().await;
        store_code(&state, "code-1", "openid profile", None).await;
        let first = redeem_authorization_code(&state, "code-1", REDIRECT_URI, CLIENT_ID, None)
            .await
            .unwrap();

        let second = rotate_refresh_token(&state, &first.refresh_token, CLIENT_ID)
            .await
            .unwrap();
        assert_eq!(second.scope, first.scope);
        assert_ne!(second.refresh_token, first.refresh_token);
        assert!(second.id_token.is_none());

        assert!(matches!(
            rotate_refresh_token(&state, &first.refresh_token, CLIENT_ID).await,
            Err(OAuthError::InvalidGrant)
        ));
        assert!(
            rotate_refresh_token(&state, &second.refresh_token, CLIENT_ID)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_refresh_token_bound_to_client() {
        let state = seeded_state().await;
        store_code(&state, "code-1", "profile", None).await;
        let issued = redeem_authorization_code(&state, "code-1", REDIRECT_URI, CLIENT_ID, None)
            .await
            .unwrap();

        assert!(matches!(
            rotate_refresh_token(&state, &issued.refresh_token, "c2").await,
            Err(OAuthError::InvalidGrant)
        ));
        // The foreign attempt must not have burned the token
        assert!(
            rotate_refresh_token(&state, &issued.refresh_token, CLIENT_ID)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_expired_refresh_token_rejected() {
        let state = seeded_state().await;
        let now = Utc::now();
        let access = AccessToken {
            token: "access-old".to_string(),
            client_id: CLIENT_ID.to_string(),
            user_id: USER_ID.to_string(),
            scope: "profile".to_string(),
            expires_at: now - Duration::days(29),
            issued_at: now - Duration::days(31),
        };
        let refresh = RefreshToken {
            token: "refresh-old".to_string(),
            client_id: CLIENT_ID.to_string(),
            user_id: USER_ID.to_string(),
            scope: "profile".to_string(),
            expires_at: now - Duration::seconds(1),
            issued_at: now - Duration::days(31),
        };
        state.storage.save_token_pair(&access, &refresh).await.unwrap();

        assert!(matches!(
            rotate_refresh_token(&state, "refresh-old", CLIENT_ID).await,
            Err(OAuthError::InvalidGrant)
        ));
    }

    #[tokio::test]
    async fn test_grants_of_deleted_client_rejected() {
        let state = seeded_state().await;
        store_code(&state, "code-1", "profile", None).await;
        store_code(&state, "code-2", "profile", None).await;
        let issued = redeem_authorization_code(&state, "code-1", REDIRECT_URI, CLIENT_ID, None)
            .await
            .unwrap();

        // Storage-level delete only: records survive, the grants still fail
        assert!(state.storage.delete_client(CLIENT_ID).await.unwrap());

        assert!(matches!(
            rotate_refresh_token(&state, &issued.refresh_token, CLIENT_ID).await,
            Err(OAuthError::InvalidGrant)
        ));
        assert!(matches!(
            redeem_authorization_code(&state, "code-2", REDIRECT_URI, CLIENT_ID, None).await,
            Err(OAuthError::InvalidGrant)
        ));
    }
}
