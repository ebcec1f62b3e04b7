//! Administrator client management
//!
//! Same record operations as `/developer/apps` without the owner filter,
//! plus reading and updating a single client. Only users with the admin
//! role get through.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
};
use tracing::{debug, info};

use crate::oauth::OAuthState;
use crate::oauth::clients::{ClientSummary, ClientUpdate, NewClientRequest};
use crate::oauth::developer::{AppCredentials, AppList, ManagementError, require_principal};
use crate::oauth::error::OAuthError;
use crate::oauth::models::{Role, User};

/// Resolve the session and insist on an admin account
async fn require_admin(state: &OAuthState, headers: &HeaderMap) -> Result<User, ManagementError> {
    let principal = require_principal(state, headers)?;
    match state.storage.find_user(&principal.user_id).await.map_err(OAuthError::from)? {
        Some(user) if user.role == Role::Admin => Ok(user),
        _ => {
            debug!(user_id = %principal.user_id, "Admin route refused");
            Err(ManagementError::Forbidden)
        }
    }
}

/// GET /admin/clients
pub async fn list_clients(
    State(state): State<OAuthState>,
    headers: HeaderMap,
) -> Result<Json<AppList>, ManagementError> {
    require_admin(&state, &headers).await?;
    let clients = state.clients.list_all_clients().await?;
    Ok(Json(AppList {
        count: clients.len(),
        clients,
    }))
}

/// POST /admin/clients
///
/// Owned by the calling admin. Confidential unless the body says otherwise.
pub async fn create_client(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    body: Result<Json<NewClientRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AppCredentials>), ManagementError> {
    let admin = require_admin(&state, &headers).await?;
    let Json(mut request) = body.map_err(OAuthError::from)?;
    request.is_confidential.get_or_insert(true);

    let (_, client) = state.clients.register_client(&admin.id, request).await?;
    Ok((StatusCode::CREATED, Json(AppCredentials { client })))
}

/// GET /admin/clients/:client_id
pub async fn get_client(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
) -> Result<Json<ClientSummary>, ManagementError> {
    require_admin(&state, &headers).await?;
    let client = state
        .clients
        .client_summary(&client_id)
        .await?
        .ok_or(ManagementError::NotFound)?;
    Ok(Json(client))
}

/// PUT /admin/clients/:client_id
///
/// Partial update of name, redirect URIs, scopes and confidentiality.
pub async fn update_client(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
    body: Result<Json<ClientUpdate>, JsonRejection>,
) -> Result<Json<ClientSummary>, ManagementError> {
    let admin = require_admin(&state, &headers).await?;
    let Json(update) = body.map_err(OAuthError::from)?;

    let client = state
        .clients
        .update_client(&client_id, update)
        .await?
        .ok_or(ManagementError::NotFound)?;
    info!(client_id = %client_id, admin_id = %admin.id, "Client updated by admin");
    Ok(Json(client))
}

/// POST /admin/clients/:client_id/rotate-secret
pub async fn rotate_client_secret(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
) -> Result<Json<AppCredentials>, ManagementError> {
    require_admin(&state, &headers).await?;
    let client = state
        .clients
        .rotate_any_secret(&client_id)
        .await?
        .ok_or(ManagementError::NotFound)?;
    Ok(Json(AppCredentials { client }))
}

/// DELETE /admin/clients/:client_id
pub async fn delete_client(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
) -> Result<StatusCode, ManagementError> {
    require_admin(&state, &headers).await?;
    if state.clients.delete_any_client(&client_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ManagementError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::test_support::{USER_ID, seeded_state};
    use axum::http::HeaderValue;
    use axum::response::IntoResponse;

    fn session(user_id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-authenticated-user",
            HeaderValue::from_str(user_id).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_require_admin_checks_role() {
        let state = seeded_state().await;
        state
            .storage
            .save_user(&User {
                id: "admin-1".to_string(),
                email: "admin@example.com".to_string(),
                password_hash: "hash".to_string(),
                name: None,
                role: Role::Admin,
            })
            .await
            .unwrap();

        let anonymous = require_admin(&state, &HeaderMap::new()).await.unwrap_err();
        assert_eq!(anonymous.into_response().status(), StatusCode::UNAUTHORIZED);

        let regular = require_admin(&state, &session(USER_ID)).await.unwrap_err();
        assert_eq!(regular.into_response().status(), StatusCode::FORBIDDEN);

        let unknown = require_admin(&state, &session("ghost")).await.unwrap_err();
        assert_eq!(unknown.into_response().status(), StatusCode::FORBIDDEN);

        let admin = require_admin(&state, &session("admin-1")).await.unwrap();
        assert_eq!(admin.id, "admin-1");
    }
}
