//! OAuth Storage Backend
//!
//! Persistence gateway for the five record kinds. Code redemption and refresh
//! rotation go through the atomic `take_*` operations so two concurrent
//! redemptions of the same credential yield exactly one record.
//!
//! Expiry is *not* enforced here: callers check `expires_at` at read time.
//! `cleanup_expired` is a janitor and nothing relies on it having run.

use crate::oauth::error::OAuthError;
use crate::oauth::models::{
    AccessToken, AuthorizationCode, Expiring, OAuthClient, RefreshToken, User,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum OAuthStorageError {
    #[error("Duplicate {kind} identifier")]
    Duplicate { kind: &'static str },

    #[error("Storage error: {0}")]
    General(String),
}

impl From<OAuthStorageError> for OAuthError {
    fn from(err: OAuthStorageError) -> Self {
        OAuthError::ServerError(err.to_string())
    }
}

/// Counts of records removed by [`OAuthStorage::cleanup_expired`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub authorization_codes: usize,
    pub access_tokens: usize,
    pub refresh_tokens: usize,
}

/// OAuth storage backend trait
#[async_trait]
pub trait OAuthStorage: Send + Sync {
    // Client operations
    /// Store a new client; an existing `client_id` is `Duplicate`.
    async fn insert_client(&self, client: &OAuthClient) -> Result<(), OAuthStorageError>;
    /// Insert or replace by `client_id`
    async fn save_client(&self, client: &OAuthClient) -> Result<(), OAuthStorageError>;
    async fn find_client(&self, client_id: &str) -> Result<Option<OAuthClient>, OAuthStorageError>;
    async fn list_clients(&self) -> Result<Vec<OAuthClient>, OAuthStorageError>;
    async fn list_clients_by_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<OAuthClient>, OAuthStorageError>;
    async fn delete_client(&self, client_id: &str) -> Result<bool, OAuthStorageError>;

    // User operations
    async fn save_user(&self, user: &User) -> Result<(), OAuthStorageError>;
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, OAuthStorageError>;

    // Authorization code operations
    async fn save_authorization_code(
        &self,
        code: &AuthorizationCode,
    ) -> Result<(), OAuthStorageError>;
    async fn find_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, OAuthStorageError>;
    /// Atomically remove and return the code. At most one caller ever sees `Some`.
    async fn take_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, OAuthStorageError>;

    // Token operations
    /// Persist an access/refresh pair; both become visible together or neither does.
    async fn save_token_pair(
        &self,
        access: &AccessToken,
        refresh: &RefreshToken,
    ) -> Result<(), OAuthStorageError>;
    async fn find_access_token(
        &self,
        token: &str,
    ) -> Result<Option<AccessToken>, OAuthStorageError>;
    async fn delete_access_token(
        &self,
        token: &str,
        client_id: &str,
    ) -> Result<bool, OAuthStorageError>;
    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshToken>, OAuthStorageError>;
    /// Atomically remove and return the refresh token if it belongs to `client_id`.
    async fn take_refresh_token(
        &self,
        token: &str,
        client_id: &str,
    ) -> Result<Option<RefreshToken>, OAuthStorageError>;
    async fn delete_refresh_token(
        &self,
        token: &str,
        client_id: &str,
    ) -> Result<bool, OAuthStorageError>;

    /// Drop every code and token issued to `client_id`
    async fn revoke_client_grants(&self, client_id: &str)
    -> Result<CleanupReport, OAuthStorageError>;

    // Cleanup expired entries
    async fn cleanup_expired(&self) -> Result<CleanupReport, OAuthStorageError>;
}

/// In-memory OAuth storage implementation
///
/// Thread-safe storage using tokio `RwLock`s. Multi-map operations always
/// lock access tokens before refresh tokens.
pub struct InMemoryOAuthStorage {
    clients: Arc<RwLock<HashMap<String, OAuthClient>>>,
    users: Arc<RwLock<HashMap<String, User>>>,
    authorization_codes: Arc<RwLock<HashMap<String, AuthorizationCode>>>,
    access_tokens: Arc<RwLock<HashMap<String, AccessToken>>>,
    refresh_tokens: Arc<RwLock<HashMap<String, RefreshToken>>>,
}

impl InMemoryOAuthStorage {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            users: Arc::new(RwLock::new(HashMap::new())),
            authorization_codes: Arc::new(RwLock::new(HashMap::new())),
            access_tokens: Arc::new(RwLock::new(HashMap::new())),
            refresh_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryOAuthStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OAuthStorage for InMemoryOAuthStorage {
    async fn insert_client(&self, client: &OAuthClient) -> Result<(), OAuthStorageError> {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&client.client_id) {
            return Err(OAuthStorageError::Duplicate { kind: "client" });
        }
        clients.insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn save_client(&self, client: &OAuthClient) -> Result<(), OAuthStorageError> {
        let mut clients = self.clients.write().await;
        clients.insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<OAuthClient>, OAuthStorageError> {
        let clients = self.clients.read().await;
        Ok(clients.get(client_id).cloned())
    }

    async fn list_clients(&self) -> Result<Vec<OAuthClient>, OAuthStorageError> {
        let clients = self.clients.read().await;
        let mut all: Vec<OAuthClient> = clients.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn list_clients_by_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<OAuthClient>, OAuthStorageError> {
        let clients = self.clients.read().await;
        let mut owned: Vec<OAuthClient> = clients
            .values()
            .filter(|client| client.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(owned)
    }

    async fn delete_client(&self, client_id: &str) -> Result<bool, OAuthStorageError> {
        let mut clients = self.clients.write().await;
        Ok(clients.remove(client_id).is_some())
    }

    async fn save_user(&self, user: &User) -> Result<(), OAuthStorageError> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|existing| existing.email == user.email && existing.id != user.id)
        {
            return Err(OAuthStorageError::Duplicate { kind: "email" });
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<User>, OAuthStorageError> {
        let users = self.users.read().await;
        Ok(users.get(user_id).cloned())
    }

    async fn save_authorization_code(
        &self,
        code: &AuthorizationCode,
    ) -> Result<(), OAuthStorageError> {
        let mut codes = self.authorization_codes.write().await;
        if codes.contains_key(&code.code) {
            return Err(OAuthStorageError::Duplicate {
                kind: "authorization code",
            });
        }
        codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn find_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, OAuthStorageError> {
        let codes = self.authorization_codes.read().await;
        Ok(codes.get(code).cloned())
    }

    async fn take_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, OAuthStorageError> {
        let mut codes = self.authorization_codes.write().await;
        Ok(codes.remove(code))
    }

    async fn save_token_pair(
        &self,
        access: &AccessToken,
        refresh: &RefreshToken,
    ) -> Result<(), OAuthStorageError> {
        let mut access_tokens = self.access_tokens.write().await;
        let mut refresh_tokens = self.refresh_tokens.write().await;

        if access_tokens.contains_key(&access.token) {
            return Err(OAuthStorageError::Duplicate {
                kind: "access token",
            });
        }
        if refresh_tokens.contains_key(&refresh.token) {
            return Err(OAuthStorageError::Duplicate {
                kind: "refresh token",
            });
        }

        access_tokens.insert(access.token.clone(), access.clone());
        refresh_tokens.insert(refresh.token.clone(), refresh.clone());
        Ok(())
    }

    async fn find_access_token(
        &self,
        token: &str,
    ) -> Result<Option<AccessToken>, OAuthStorageError> {
        let tokens = self.access_tokens.read().await;
        Ok(tokens.get(token).cloned())
    }

    async fn delete_access_token(
        &self,
        token: &str,
        client_id: &str,
    ) -> Result<bool, OAuthStorageError> {
        let mut tokens = self.access_tokens.write().await;
        match tokens.get(token) {
            Some(record) if record.client_id == client_id => {
                tokens.remove(token);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshToken>, OAuthStorageError> {
        let tokens = self.refresh_tokens.read().await;
        Ok(tokens.get(token).cloned())
    }

    async fn take_refresh_token(
        &self,
        token: &str,
        client_id: &str,
    ) -> Result<Option<RefreshToken>, OAuthStorageError> {
        let mut tokens = self.refresh_tokens.write().await;
        match tokens.get(token) {
            Some(record) if record.client_id == client_id => Ok(tokens.remove(token)),
            _ => Ok(None),
        }
    }

    async fn delete_refresh_token(
        &self,
        token: &str,
        client_id: &str,
    ) -> Result<bool, OAuthStorageError> {
        Ok(self.take_refresh_token(token, client_id).await?.is_some())
    }

    async fn revoke_client_grants(
        &self,
        client_id: &str,
    ) -> Result<CleanupReport, OAuthStorageError> {
        let mut report = CleanupReport::default();

        {
            let mut codes = self.authorization_codes.write().await;
            let before = codes.len();
            codes.retain(|_, code| code.client_id != client_id);
            report.authorization_codes = before - codes.len();
        }

        let mut access_tokens = self.access_tokens.write().await;
        let mut refresh_tokens = self.refresh_tokens.write().await;
        let before = access_tokens.len();
        access_tokens.retain(|_, token| token.client_id != client_id);
        report.access_tokens = before - access_tokens.len();
        let before = refresh_tokens.len();
        refresh_tokens.retain(|_, token| token.client_id != client_id);
        report.refresh_tokens = before - refresh_tokens.len();

        Ok(report)
    }

    async fn cleanup_expired(&self) -> Result<CleanupReport, OAuthStorageError> {
        let now = Utc::now();
        let mut report = CleanupReport::default();

        {
            let mut codes = self.authorization_codes.write().await;
            let before = codes.len();
            codes.retain(|_, code| !code.is_expired_at(now));
            report.authorization_codes = before - codes.len();
        }

        {
            let mut tokens = self.access_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, token| !token.is_expired_at(now));
            report.access_tokens = before - tokens.len();
        }

        {
            let mut tokens = self.refresh_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, token| !token.is_expired_at(now));
            report.refresh_tokens = before - tokens.len();
        }

        Ok(report)
    }
}

/// Spawn a background task that purges expired records every `interval`.
pub fn spawn_janitor(storage: Arc<dyn OAuthStorage>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match storage.cleanup_expired().await {
                Ok(report) => debug!(
                    codes = report.authorization_codes,
                    access_tokens = report.access_tokens,
                    refresh_tokens = report.refresh_tokens,
                    "Expired OAuth records purged"
                ),
                Err(e) => error!(error = %e, "Expired record cleanup failed"),
            }
        }
    })
}
