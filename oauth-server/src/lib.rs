//! # PulseEngine OAuth Server
//!
//! An OAuth 2.0 / OpenID Connect authorization server: authorization code
//! grant with PKCE, rotating refresh tokens, RS256-signed ID tokens,
//! introspection, revocation, UserInfo and discovery.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pulseengine_oauth_server::{OAuthConfig, server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = OAuthConfig::load(None)?;
//!     let state = server::bootstrap(&config).await?;
//!     server::serve(&config, state).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Embedding the router
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pulseengine_oauth_server::{OAuthConfig, OAuthState, oauth_router};
//! use pulseengine_oauth_server::oauth::keys::SigningKeyManager;
//!
//! let keys = Arc::new(SigningKeyManager::generate("oauth-server-key-1")?);
//! let state = OAuthState::new_in_memory(OAuthConfig::default(), keys)?;
//! let app = axum::Router::new().merge(oauth_router(state));
//! ```
//!
//! Users sign in elsewhere; the server learns who is behind a browser
//! request through a [`session::SessionResolver`].

pub mod config;
pub mod crypto;
pub mod logging;
pub mod oauth;
pub mod server;
pub mod session;

pub use config::{ConfigError, OAuthConfig};
pub use logging::{LogFormat, LoggingConfig};
pub use oauth::{OAuthError, OAuthState, oauth_router};
pub use session::{Principal, SessionResolver, TrustedHeaderSession};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
