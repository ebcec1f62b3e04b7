//! Developer application management
//!
//! Signed-in users manage the OAuth clients they own. A client owned by
//! somebody else is indistinguishable from one that does not exist.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::oauth::OAuthState;
use crate::oauth::clients::{ClientSummary, IssuedClientCredentials, NewClientRequest};
use crate::oauth::error::OAuthError;
use crate::session::Principal;

/// Failure of a client management request (developer or admin)
#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Admin access required")]
    Forbidden,

    #[error("Application not found")]
    NotFound,

    #[error(transparent)]
    OAuth(#[from] OAuthError),
}

impl IntoResponse for ManagementError {
    fn into_response(self) -> Response {
        let description = self.to_string();
        match self {
            ManagementError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthorized", "error_description": description })),
            )
                .into_response(),
            ManagementError::Forbidden => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "forbidden", "error_description": description })),
            )
                .into_response(),
            ManagementError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "not_found", "error_description": description })),
            )
                .into_response(),
            ManagementError::OAuth(err) => err.into_response(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AppList {
    pub count: usize,
    pub clients: Vec<ClientSummary>,
}

#[derive(Debug, Serialize)]
pub struct AppCredentials {
    pub client: IssuedClientCredentials,
}

pub(crate) fn require_principal(
    state: &OAuthState,
    headers: &HeaderMap,
) -> Result<Principal, ManagementError> {
    state
        .session
        .resolve(headers)
        .ok_or(ManagementError::Unauthenticated)
}

/// GET /developer/apps
pub async fn list_apps(
    State(state): State<OAuthState>,
    headers: HeaderMap,
) -> Result<Json<AppList>, ManagementError> {
    let principal = require_principal(&state, &headers)?;
    let clients = state.clients.list_clients(&principal.user_id).await?;
    Ok(Json(AppList {
        count: clients.len(),
        clients,
    }))
}

/// POST /developer/apps
///
/// The secret is returned in this response only.
pub async fn create_app(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    body: Result<Json<NewClientRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AppCredentials>), ManagementError> {
    let principal = require_principal(&state, &headers)?;
    let Json(request) = body.map_err(OAuthError::from)?;
    let (_, client) = state
        .clients
        .register_client(&principal.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(AppCredentials { client })))
}

/// POST /developer/apps/:client_id/rotate-secret
pub async fn rotate_app_secret(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
) -> Result<Json<AppCredentials>, ManagementError> {
    let principal = require_principal(&state, &headers)?;
    let client = state
        .clients
        .rotate_secret(&principal.user_id, &client_id)
        .await?
        .ok_or(ManagementError::NotFound)?;
    Ok(Json(AppCredentials { client }))
}

/// DELETE /developer/apps/:client_id
pub async fn delete_app(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
) -> Result<StatusCode, ManagementError> {
    let principal = require_principal(&state, &headers)?;
    if state
        .clients
        .delete_client(&principal.user_id, &client_id)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ManagementError::NotFound)
    }
}
