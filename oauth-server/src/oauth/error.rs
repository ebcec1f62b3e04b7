//! OAuth error taxonomy (RFC 6749 Section 5.2, RFC 7009, RFC 7662, RFC 6750)
//!
//! Every protocol failure leaves the server as one of these variants. The
//! `error` code is surfaced verbatim; descriptions for `invalid_grant` are
//! fixed strings so a caller can never learn which check failed.

use axum::{
    Json,
    extract::rejection::{FormRejection, JsonRejection, QueryRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Protocol-level error returned by every OAuth operation
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Malformed request or missing parameter
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    /// Client authentication failed
    #[error("invalid_client")]
    InvalidClient,

    /// Code or refresh token is unknown, expired, consumed, mismatched or failed PKCE
    #[error("invalid_grant")]
    InvalidGrant,

    /// `grant_type` is not one this server implements
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),

    /// The resource owner declined consent
    #[error("access_denied")]
    AccessDenied,

    /// Bearer token presented to a protected endpoint is not valid
    #[error("invalid_token")]
    InvalidToken,

    /// Unanticipated store or crypto failure
    #[error("server_error: {0}")]
    ServerError(String),
}

/// Error response body (RFC 6749 Section 5.2)
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl OAuthError {
    /// Shorthand for [`OAuthError::InvalidRequest`]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::InvalidRequest(description.into())
    }

    /// Shorthand for [`OAuthError::ServerError`]
    pub fn server_error(description: impl Into<String>) -> Self {
        Self::ServerError(description.into())
    }

    /// RFC error code
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::InvalidClient => "invalid_client",
            OAuthError::InvalidGrant => "invalid_grant",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::AccessDenied => "access_denied",
            OAuthError::InvalidToken => "invalid_token",
            OAuthError::ServerError(_) => "server_error",
        }
    }

    /// Caller-visible description. Server errors are never echoed.
    pub fn error_description(&self) -> Option<String> {
        match self {
            OAuthError::InvalidRequest(desc) => Some(desc.clone()),
            OAuthError::InvalidClient => Some("Client authentication failed".to_string()),
            OAuthError::InvalidGrant => {
                Some("The provided grant is invalid, expired or already used".to_string())
            }
            OAuthError::UnsupportedGrantType(grant) => {
                Some(format!("grant_type '{grant}' is not supported"))
            }
            OAuthError::AccessDenied => Some("The resource owner denied the request".to_string()),
            OAuthError::InvalidToken => Some("The access token is invalid or expired".to_string()),
            OAuthError::ServerError(_) => Some("Internal server error".to_string()),
        }
    }

    /// HTTP status mandated for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            OAuthError::InvalidRequest(_)
            | OAuthError::InvalidGrant
            | OAuthError::UnsupportedGrantType(_) => StatusCode::BAD_REQUEST,
            OAuthError::InvalidClient | OAuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            OAuthError::AccessDenied => StatusCode::FORBIDDEN,
            OAuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body for this error
    pub fn to_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.error_code(),
            error_description: self.error_description(),
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        if let OAuthError::ServerError(ref detail) = self {
            error!(detail = %detail, "OAuth request failed with server error");
        }

        let status = self.status_code();
        let mut response = (status, Json(self.to_body())).into_response();

        match self {
            OAuthError::InvalidClient => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"oauth\""),
                );
            }
            OAuthError::InvalidToken => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer realm=\"oauth\", error=\"invalid_token\""),
                );
            }
            _ => {}
        }

        response
    }
}

// Extractor rejections answer as `invalid_request` instead of axum's plain text
impl From<FormRejection> for OAuthError {
    fn from(rejection: FormRejection) -> Self {
        OAuthError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for OAuthError {
    fn from(rejection: QueryRejection) -> Self {
        OAuthError::InvalidRequest(rejection.body_text())
    }
}

impl From<JsonRejection> for OAuthError {
    fn from(rejection: JsonRejection) -> Self {
        OAuthError::InvalidRequest(rejection.body_text())
    }
}
