//! Client Registry
//!
//! Lookup and authentication of registered applications, plus the
//! management operations behind `/developer/apps` (owner-scoped) and
//! `/admin/clients` (unscoped).

use std::sync::Arc;

use axum::http::{HeaderMap, header};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::crypto::constant_time_eq;
use crate::oauth::error::OAuthError;
use crate::oauth::models::{DEFAULT_SCOPE, OAuthClient, OPENID_SCOPE, non_empty};
use crate::oauth::storage::OAuthStorage;

/// Number of secret characters shown in client listings
pub const SECRET_PREVIEW_LEN: usize = 6;

pub const MAX_CLIENT_NAME_LEN: usize = 100;

/// Client credentials presented with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    /// Extract credentials from a form body pair or an `Authorization: Basic` header
    ///
    /// The body pair wins when both halves are present. Returns `None` when
    /// neither source carries a complete id/secret pair.
    pub fn from_request(
        body_client_id: Option<&str>,
        body_client_secret: Option<&str>,
        headers: &HeaderMap,
    ) -> Option<Self> {
        if let (Some(id), Some(secret)) = (
            body_client_id.filter(|v| !v.is_empty()),
            body_client_secret.filter(|v| !v.is_empty()),
        ) {
            return Some(Self {
                client_id: id.to_string(),
                client_secret: secret.to_string(),
            });
        }

        Self::from_basic_header(headers)
    }

    /// RFC 6749 Section 2.3.1: `Basic base64(urlencode(id):urlencode(secret))`
    pub fn from_basic_header(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let encoded = value
            .strip_prefix("Basic ")
            .or_else(|| value.strip_prefix("basic "))?;
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (id, secret) = decoded.split_once(':')?;

        let client_id = urlencoding::decode(id).ok()?.into_owned();
        let client_secret = urlencoding::decode(secret).ok()?.into_owned();
        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id,
            client_secret,
        })
    }
}

/// Request body for creating a client
#[derive(Debug, Clone, Deserialize)]
pub struct NewClientRequest {
    pub name: String,
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub is_confidential: Option<bool>,
}

/// Partial settings update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub redirect_uris: Option<Vec<String>>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub is_confidential: Option<bool>,
}

/// Client as shown to its owner; the secret itself is never listed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSummary {
    pub client_id: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub is_confidential: bool,
    pub has_secret: bool,
    pub secret_preview: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<&OAuthClient> for ClientSummary {
    fn from(client: &OAuthClient) -> Self {
        let has_secret = !client.client_secret.is_empty();
        Self {
            client_id: client.client_id.clone(),
            name: client.client_name.clone(),
            redirect_uris: client.redirect_uris.clone(),
            scopes: client.scopes.clone(),
            is_confidential: client.is_confidential,
            has_secret,
            secret_preview: has_secret
                .then(|| client.client_secret.chars().take(SECRET_PREVIEW_LEN).collect()),
            created_at: client.created_at,
        }
    }
}

/// Newly issued credentials, returned exactly once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Registry over the client collection of an [`OAuthStorage`]
#[derive(Clone)]
pub struct ClientRegistry {
    storage: Arc<dyn OAuthStorage>,
}

impl ClientRegistry {
    pub fn new(storage: Arc<dyn OAuthStorage>) -> Self {
        Self { storage }
    }

    pub async fn find_client(&self, client_id: &str) -> Result<Option<OAuthClient>, OAuthError> {
        Ok(self.storage.find_client(client_id).await?)
    }

    /// Authenticate a client by id and secret
    ///
    /// Unknown clients and wrong secrets fail identically with `invalid_client`.
    pub async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<OAuthClient, OAuthError> {
        let Some(client) = self.storage.find_client(client_id).await? else {
            debug!(client_id = %client_id, "Client authentication failed: unknown client");
            return Err(OAuthError::InvalidClient);
        };

        if client.client_secret.is_empty()
            || !constant_time_eq(&client.client_secret, client_secret)
        {
            warn!(client_id = %client_id, "Client authentication failed: bad secret");
            return Err(OAuthError::InvalidClient);
        }

        Ok(client)
    }

    /// Authenticate whatever credentials the request carried; absence is `invalid_client`
    pub async fn authenticate(
        &self,
        credentials: Option<ClientCredentials>,
    ) -> Result<OAuthClient, OAuthError> {
        let credentials = credentials.ok_or(OAuthError::InvalidClient)?;
        self.authenticate_client(&credentials.client_id, &credentials.client_secret)
            .await
    }

    /// Register a client owned by `owner_id` and hand back its credentials
    pub async fn register_client(
        &self,
        owner_id: &str,
        request: NewClientRequest,
    ) -> Result<(OAuthClient, IssuedClientCredentials), OAuthError> {
        let name = validate_name(Some(request.name))?;
        validate_redirect_uris(&request.redirect_uris)?;

        let scopes = request
            .scopes
            .filter(|scopes| !scopes.is_empty())
            .unwrap_or_else(|| vec![OPENID_SCOPE.to_string(), DEFAULT_SCOPE.to_string()]);

        let client = OAuthClient {
            client_id: Uuid::new_v4().to_string(),
            client_secret: Uuid::new_v4().to_string(),
            client_name: name,
            redirect_uris: request.redirect_uris,
            owner_id: owner_id.to_string(),
            scopes,
            is_confidential: request.is_confidential.unwrap_or(false),
            created_at: Utc::now(),
        };
        self.storage.insert_client(&client).await?;

        info!(client_id = %client.client_id, owner_id = %owner_id, "Registered OAuth client");
        let issued = IssuedClientCredentials {
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
        };
        Ok((client, issued))
    }

    /// Clients owned by `owner_id`, oldest first
    pub async fn list_clients(&self, owner_id: &str) -> Result<Vec<ClientSummary>, OAuthError> {
        let clients = self.storage.list_clients_by_owner(owner_id).await?;
        Ok(clients.iter().map(ClientSummary::from).collect())
    }

    /// Every registered client, oldest first
    pub async fn list_all_clients(&self) -> Result<Vec<ClientSummary>, OAuthError> {
        let clients = self.storage.list_clients().await?;
        Ok(clients.iter().map(ClientSummary::from).collect())
    }

    pub async fn client_summary(&self, client_id: &str) -> Result<Option<ClientSummary>, OAuthError> {
        Ok(self
            .storage
            .find_client(client_id)
            .await?
            .as_ref()
            .map(ClientSummary::from))
    }

    /// Apply a partial settings update. The id and secret never change here.
    pub async fn update_client(
        &self,
        client_id: &str,
        update: ClientUpdate,
    ) -> Result<Option<ClientSummary>, OAuthError> {
        let name = update.name.map(|name| validate_name(Some(name))).transpose()?;
        if let Some(uris) = &update.redirect_uris {
            validate_redirect_uris(uris)?;
        }

        let Some(mut client) = self.storage.find_client(client_id).await? else {
            return Ok(None);
        };
        if let Some(name) = name {
            client.client_name = name;
        }
        if let Some(uris) = update.redirect_uris {
            client.redirect_uris = uris;
        }
        if let Some(scopes) = update.scopes {
            client.scopes = scopes;
        }
        if let Some(confidential) = update.is_confidential {
            client.is_confidential = confidential;
        }
        self.storage.save_client(&client).await?;

        info!(client_id = %client_id, "Updated OAuth client");
        Ok(Some(ClientSummary::from(&client)))
    }

    /// Replace the secret of an owned client. `None` when the client is missing or foreign.
    pub async fn rotate_secret(
        &self,
        owner_id: &str,
        client_id: &str,
    ) -> Result<Option<IssuedClientCredentials>, OAuthError> {
        match self.find_owned(owner_id, client_id).await? {
            Some(client) => Ok(Some(self.reissue_secret(client).await?)),
            None => Ok(None),
        }
    }

    /// Replace the secret of any client
    pub async fn rotate_any_secret(
        &self,
        client_id: &str,
    ) -> Result<Option<IssuedClientCredentials>, OAuthError> {
        match self.storage.find_client(client_id).await? {
            Some(client) => Ok(Some(self.reissue_secret(client).await?)),
            None => Ok(None),
        }
    }

    /// Delete an owned client. `false` when the client is missing or foreign.
    pub async fn delete_client(&self, owner_id: &str, client_id: &str) -> Result<bool, OAuthError> {
        if self.find_owned(owner_id, client_id).await?.is_none() {
            return Ok(false);
        }
        self.remove_client(client_id).await
    }

    /// Delete any client. `false` when it does not exist.
    pub async fn delete_any_client(&self, client_id: &str) -> Result<bool, OAuthError> {
        self.remove_client(client_id).await
    }

    async fn reissue_secret(
        &self,
        mut client: OAuthClient,
    ) -> Result<IssuedClientCredentials, OAuthError> {
        client.client_secret = Uuid::new_v4().to_string();
        self.storage.save_client(&client).await?;

        info!(client_id = %client.client_id, "Rotated client secret");
        Ok(IssuedClientCredentials {
            client_id: client.client_id,
            client_secret: client.client_secret,
        })
    }

    /// Remove the client and every code and token issued to it
    async fn remove_client(&self, client_id: &str) -> Result<bool, OAuthError> {
        if !self.storage.delete_client(client_id).await? {
            return Ok(false);
        }
        let revoked = self.storage.revoke_client_grants(client_id).await?;
        info!(
            client_id = %client_id,
            codes = revoked.authorization_codes,
            access_tokens = revoked.access_tokens,
            refresh_tokens = revoked.refresh_tokens,
            "Deleted OAuth client"
        );
        Ok(true)
    }

    async fn find_owned(
        &self,
        owner_id: &str,
        client_id: &str,
    ) -> Result<Option<OAuthClient>, OAuthError> {
        Ok(self
            .storage
            .find_client(client_id)
            .await?
            .filter(|client| client.owner_id == owner_id))
    }
}

fn validate_name(name: Option<String>) -> Result<String, OAuthError> {
    let name = non_empty(name).ok_or_else(|| OAuthError::invalid_request("name is required"))?;
    if name.chars().count() > MAX_CLIENT_NAME_LEN {
        return Err(OAuthError::invalid_request(format!(
            "name must be at most {MAX_CLIENT_NAME_LEN} characters"
        )));
    }
    Ok(name)
}

fn validate_redirect_uris(uris: &[String]) -> Result<(), OAuthError> {
    if uris.is_empty() {
        return Err(OAuthError::invalid_request(
            "At least one redirect_uri is required",
        ));
    }
    for uri in uris {
        if Url::parse(uri).is_err() {
            return Err(OAuthError::invalid_request(format!(
                "Invalid redirect_uri: {uri}"
            )));
        }
    }
    Ok(())
}
