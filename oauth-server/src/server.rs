//! Process startup: key material, seeding, janitor and the HTTP listener

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, OAuthConfig};
use crate::oauth::keys::{KeyError, SigningKeyManager};
use crate::oauth::storage::{OAuthStorageError, spawn_janitor};
use crate::oauth::{OAuthState, oauth_router};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("Failed to seed store: {0}")]
    Seed(#[from] OAuthStorageError),

    #[error("HTTP server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Load or generate the signing key
pub fn load_signing_key(config: &OAuthConfig) -> Result<SigningKeyManager, KeyError> {
    match &config.signing_key_path {
        Some(path) => SigningKeyManager::from_pem_file(path, config.signing_key_id.as_str()),
        None => {
            warn!("No signing_key_path configured; ID tokens will not verify after a restart");
            SigningKeyManager::generate(config.signing_key_id.as_str())
        }
    }
}

/// Build the shared state: signing key, in-memory store and configured seed records
pub async fn bootstrap(config: &OAuthConfig) -> Result<OAuthState, ServerError> {
    let keys = Arc::new(load_signing_key(config)?);
    let state = OAuthState::new_in_memory(config.clone(), keys)?;

    for user in &config.seed.users {
        state.storage.save_user(user).await?;
    }
    for client in &config.seed.clients {
        state.storage.insert_client(client).await?;
    }
    if !config.seed.users.is_empty() || !config.seed.clients.is_empty() {
        info!(
            users = config.seed.users.len(),
            clients = config.seed.clients.len(),
            "Seeded store"
        );
    }

    Ok(state)
}

/// Serve the OAuth router until Ctrl-C / SIGTERM
pub async fn serve(config: &OAuthConfig, state: OAuthState) -> Result<(), ServerError> {
    let addr = config.socket_addr()?;
    let janitor = spawn_janitor(state.storage.clone(), config.janitor_interval());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, issuer = %config.issuer, "OAuth server listening");

    let result = axum::serve(listener, oauth_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    janitor.abort();
    info!("OAuth server stopped");
    Ok(result?)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
