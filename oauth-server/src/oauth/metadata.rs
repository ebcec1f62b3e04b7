//! OpenID Connect Discovery and JWK Set endpoints

use axum::{
    Json,
    extract::State,
    http::header,
    response::IntoResponse,
};
use serde_json::{Value, json};

use crate::config::OAuthConfig;
use crate::oauth::OAuthState;

/// Discovery document for the configured issuer
pub fn discovery_document(config: &OAuthConfig) -> Value {
    let issuer = &config.issuer;
    let base_url = config.issuer_base();

    json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{base_url}/oauth/authorize"),
        "token_endpoint": format!("{base_url}/oauth/token"),
        "userinfo_endpoint": format!("{base_url}/oauth/userinfo"),
        "jwks_uri": format!("{base_url}/.well-known/jwks.json"),
        "revocation_endpoint": format!("{base_url}/oauth/revoke"),
        "introspection_endpoint": format!("{base_url}/oauth/introspect"),

        "response_types_supported": ["code"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256", "plain"],
        "scopes_supported": ["openid", "profile", "email"],
        "claims_supported": ["sub", "iss", "aud", "exp", "iat", "nonce", "name", "email"],

        // Client authentication
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
        "revocation_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
        "introspection_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
    })
}

/// GET /.well-known/openid-configuration
pub async fn openid_configuration(State(state): State<OAuthState>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(discovery_document(&state.config)),
    )
}

/// GET /.well-known/jwks.json
pub async fn jwks(State(state): State<OAuthState>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "public, max-age=86400")],
        Json(state.keys.jwks()),
    )
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}
