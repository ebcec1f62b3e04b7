//! OAuth 2.0 / OpenID Connect Authorization Server
//!
//! Implements:
//! - RFC 6749: authorization code and refresh token grants
//! - RFC 7636: PKCE (S256 and plain)
//! - RFC 7009: Token Revocation
//! - RFC 7662: Token Introspection
//! - OpenID Connect Core 1.0: ID tokens and UserInfo
//! - OpenID Connect Discovery 1.0 and a JWK Set endpoint

pub mod admin;
pub mod authorize;
pub mod clients;
pub mod developer;
pub mod error;
pub mod introspect;
pub mod keys;
pub mod metadata;
pub mod models;
pub mod pkce;
pub mod storage;
pub mod token;
pub mod userinfo;

pub use authorize::{authorize_get, authorize_post};
pub use error::OAuthError;
pub use introspect::{introspect_endpoint, revoke_endpoint};
pub use metadata::{health, jwks, openid_configuration};
pub use token::token_endpoint;
pub use userinfo::userinfo_endpoint;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::config::{ConfigError, OAuthConfig};
use crate::oauth::clients::ClientRegistry;
use crate::oauth::keys::SigningKeyManager;
use crate::oauth::storage::{InMemoryOAuthStorage, OAuthStorage};
use crate::session::{SessionResolver, TrustedHeaderSession};

/// Shared state behind every OAuth endpoint
#[derive(Clone)]
pub struct OAuthState {
    pub config: Arc<OAuthConfig>,
    pub storage: Arc<dyn OAuthStorage>,
    pub clients: ClientRegistry,
    pub keys: Arc<SigningKeyManager>,
    pub session: Arc<dyn SessionResolver>,
}

impl OAuthState {
    pub fn new(
        config: OAuthConfig,
        storage: Arc<dyn OAuthStorage>,
        keys: Arc<SigningKeyManager>,
        session: Arc<dyn SessionResolver>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            clients: ClientRegistry::new(storage.clone()),
            storage,
            keys,
            session,
        }
    }

    /// In-memory store with sessions read from the configured trusted header
    pub fn new_in_memory(
        config: OAuthConfig,
        keys: Arc<SigningKeyManager>,
    ) -> Result<Self, ConfigError> {
        let session = TrustedHeaderSession::new(config.session_header_name()?);
        Ok(Self::new(
            config,
            Arc::new(InMemoryOAuthStorage::new()),
            keys,
            Arc::new(session),
        ))
    }
}

/// Create the OAuth router with all endpoints
pub fn oauth_router(state: OAuthState) -> Router {
    Router::new()
        // OpenID Connect Discovery
        .route(
            "/.well-known/openid-configuration",
            get(openid_configuration),
        )
        .route("/.well-known/jwks.json", get(jwks))
        // Authorization endpoint (consent + code issuance)
        .route("/oauth/authorize", get(authorize_get).post(authorize_post))
        // Token endpoint (with refresh token rotation)
        .route("/oauth/token", post(token_endpoint))
        .route("/oauth/userinfo", get(userinfo_endpoint))
        // RFC 7662 / RFC 7009
        .route("/oauth/introspect", post(introspect_endpoint))
        .route("/oauth/revoke", post(revoke_endpoint))
        // Owner-scoped client management
        .route(
            "/developer/apps",
            get(developer::list_apps).post(developer::create_app),
        )
        .route(
            "/developer/apps/:client_id/rotate-secret",
            post(developer::rotate_app_secret),
        )
        .route("/developer/apps/:client_id", delete(developer::delete_app))
        // Administrator client management
        .route(
            "/admin/clients",
            get(admin::list_clients).post(admin::create_client),
        )
        .route(
            "/admin/clients/:client_id",
            get(admin::get_client)
                .put(admin::update_client)
                .delete(admin::delete_client),
        )
        .route(
            "/admin/clients/:client_id/rotate-secret",
            post(admin::rotate_client_secret),
        )
        .route("/health", get(health))
        .with_state(state)
}
