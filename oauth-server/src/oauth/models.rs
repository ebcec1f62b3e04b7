//! OAuth 2.0 / OIDC Data Models
//!
//! Persisted records (clients, users, authorization codes, access and refresh
//! tokens) plus the typed request and response shapes of each endpoint.
//! Raw form bodies are converted into typed requests once, at the boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::oauth::error::OAuthError;
use crate::oauth::pkce::CodeChallengeMethod;

/// Scope that turns an OAuth grant into an OpenID Connect one
pub const OPENID_SCOPE: &str = "openid";

/// Scope granted when an authorization request names none
pub const DEFAULT_SCOPE: &str = "profile";

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// Registered OAuth client application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub client_name: String,
    /// Exact-match redirect URIs
    pub redirect_uris: Vec<String>,
    /// Owning user, used only to filter management operations
    pub owner_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_confidential")]
    pub is_confidential: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_confidential() -> bool {
    true
}

impl OAuthClient {
    /// Exact string comparison against the registered set; no prefix or pattern matching.
    pub fn has_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }
}

/// Role of a resource owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Resource owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Role,
}

/// Single-use authorization code issued on consent approval
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    /// OIDC replay binding, echoed into the ID token
    pub nonce: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Opaque bearer access token
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub client_id: String,
    pub user_id: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

/// Rotating refresh token
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub token: String,
    pub client_id: String,
    pub user_id: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

/// Expiry is checked against the wall clock at every use.
pub trait Expiring {
    /// Instant after which the record is unusable
    fn expires_at(&self) -> DateTime<Utc>;

    /// True once `expires_at` is not in the future
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }

    /// [`Expiring::is_expired_at`] against the current time
    fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl Expiring for AuthorizationCode {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl Expiring for AccessToken {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl Expiring for RefreshToken {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// True when the space-separated scope string contains `openid`
pub fn scope_includes_openid(scope: &str) -> bool {
    scope.split_whitespace().any(|s| s == OPENID_SCOPE)
}

// ---------------------------------------------------------------------------
// Authorization endpoint
// ---------------------------------------------------------------------------

/// Authorization request parameters (GET /oauth/authorize)
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeRequest {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
}

/// Consent submission (POST /oauth/authorize)
#[derive(Debug, Clone, Deserialize)]
pub struct ConsentForm {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
    /// "1" or "true" approves; anything else (or absence) denies
    pub approve: Option<String>,
}

impl ConsentForm {
    /// Whether the resource owner approved the request
    pub fn is_approved(&self) -> bool {
        matches!(self.approve.as_deref(), Some("1") | Some("true"))
    }

    /// The authorization parameters carried through the consent form
    pub fn to_authorize_request(&self) -> AuthorizeRequest {
        AuthorizeRequest {
            response_type: Some("code".to_string()),
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scope: self.scope.clone(),
            state: self.state.clone(),
            code_challenge: self.code_challenge.clone(),
            code_challenge_method: self.code_challenge_method.clone(),
            nonce: self.nonce.clone(),
        }
    }
}

/// Validated authorization parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationParams {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
}

impl TryFrom<AuthorizeRequest> for AuthorizationParams {
    type Error = OAuthError;

    fn try_from(request: AuthorizeRequest) -> Result<Self, Self::Error> {
        match request.response_type.as_deref() {
            Some("code") => {}
            Some(_) => return Err(OAuthError::invalid_request("response_type must be 'code'")),
            None => return Err(OAuthError::invalid_request("response_type is required")),
        }

        let client_id = non_empty(request.client_id)
            .ok_or_else(|| OAuthError::invalid_request("client_id is required"))?;
        let redirect_uri = non_empty(request.redirect_uri)
            .ok_or_else(|| OAuthError::invalid_request("redirect_uri is required"))?;
        require_url(&redirect_uri)?;

        let code_challenge = non_empty(request.code_challenge);
        let code_challenge_method = match non_empty(request.code_challenge_method) {
            Some(method) => Some(method.parse::<CodeChallengeMethod>()?),
            None => None,
        };
        let code_challenge_method = match (&code_challenge, code_challenge_method) {
            (Some(_), None) => Some(CodeChallengeMethod::S256),
            (None, Some(_)) => {
                return Err(OAuthError::invalid_request(
                    "code_challenge_method requires code_challenge",
                ));
            }
            (_, method) => method,
        };

        Ok(Self {
            client_id,
            redirect_uri,
            scope: non_empty(request.scope).unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
            state: non_empty(request.state),
            nonce: non_empty(request.nonce),
            code_challenge,
            code_challenge_method,
        })
    }
}

// ---------------------------------------------------------------------------
// Token endpoint
// ---------------------------------------------------------------------------

/// Raw token request form (POST /oauth/token)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequestForm {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Validated token request, one variant per supported grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRequest {
    AuthorizationCode {
        code: String,
        redirect_uri: String,
        client_id: String,
        code_verifier: Option<String>,
    },
    RefreshToken {
        refresh_token: String,
        client_id: String,
    },
}

impl TokenRequest {
    /// `grant_type` value this request was built from
    pub fn grant_type(&self) -> &'static str {
        match self {
            TokenRequest::AuthorizationCode { .. } => "authorization_code",
            TokenRequest::RefreshToken { .. } => "refresh_token",
        }
    }

    /// Client the request is made for
    pub fn client_id(&self) -> &str {
        match self {
            TokenRequest::AuthorizationCode { client_id, .. }
            | TokenRequest::RefreshToken { client_id, .. } => client_id,
        }
    }
}

impl TryFrom<TokenRequestForm> for TokenRequest {
    type Error = OAuthError;

    fn try_from(form: TokenRequestForm) -> Result<Self, Self::Error> {
        let grant_type = non_empty(form.grant_type)
            .ok_or_else(|| OAuthError::invalid_request("grant_type is required"))?;

        match grant_type.as_str() {
            "authorization_code" => {
                let code = non_empty(form.code)
                    .ok_or_else(|| OAuthError::invalid_request("code is required"))?;
                let redirect_uri = non_empty(form.redirect_uri)
                    .ok_or_else(|| OAuthError::invalid_request("redirect_uri is required"))?;
                require_url(&redirect_uri)?;
                let client_id = non_empty(form.client_id)
                    .ok_or_else(|| OAuthError::invalid_request("client_id is required"))?;

                Ok(TokenRequest::AuthorizationCode {
                    code,
                    redirect_uri,
                    client_id,
                    code_verifier: non_empty(form.code_verifier),
                })
            }
            "refresh_token" => {
                let refresh_token = non_empty(form.refresh_token)
                    .ok_or_else(|| OAuthError::invalid_request("refresh_token is required"))?;
                let client_id = non_empty(form.client_id)
                    .ok_or_else(|| OAuthError::invalid_request("client_id is required"))?;

                Ok(TokenRequest::RefreshToken {
                    refresh_token,
                    client_id,
                })
            }
            other => Err(OAuthError::UnsupportedGrantType(other.to_string())),
        }
    }
}

/// Successful token response (RFC 6749 Section 5.1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// OpenID Connect ID token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Introspection and revocation
// ---------------------------------------------------------------------------

/// `token_type_hint` values (RFC 7009 Section 2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTypeHint {
    AccessToken,
    RefreshToken,
}

impl TokenTypeHint {
    /// Parses a raw hint; unknown values are ignored as RFC 7009 allows.
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value {
            Some("access_token") => Some(TokenTypeHint::AccessToken),
            Some("refresh_token") => Some(TokenTypeHint::RefreshToken),
            _ => None,
        }
    }
}

/// Introspection and revocation form body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenActionForm {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Introspection response (RFC 7662 Section 2.2)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl IntrospectionResponse {
    /// The uniform answer for unknown, expired and malformed tokens
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// UserInfo response (OIDC Core Section 5.3)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfoResponse {
    pub sub: String,
    pub name: Option<String>,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn require_url(value: &str) -> Result<(), OAuthError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|_| OAuthError::invalid_request("redirect_uri must be an absolute URL"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorize_request() -> AuthorizeRequest {
        AuthorizeRequest {
            response_type: Some("code".to_string()),
            client_id: Some("c1".to_string()),
            redirect_uri: Some("https://app/cb".to_string()),
            scope: None,
            state: Some("xyz".to_string()),
            code_challenge: None,
            code_challenge_method: None,
            nonce: None,
        }
    }

    #[test]
    fn test_authorize_defaults_scope_to_profile() {
        let params = AuthorizationParams::try_from(authorize_request()).unwrap();
        assert_eq!(params.scope, "profile");
        assert_eq!(params.code_challenge_method, None);
    }

    #[test]
    fn test_authorize_rejects_wrong_response_type() {
        let mut request = authorize_request();
        request.response_type = Some("token".to_string());
        let err = AuthorizationParams::try_from(request).unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");

        let mut request = authorize_request();
        request.response_type = None;
        assert!(AuthorizationParams::try_from(request).is_err());
    }

    #[test]
    fn test_authorize_challenge_defaults_to_s256() {
        let mut request = authorize_request();
        request.code_challenge = Some("abc".to_string());
        let params = AuthorizationParams::try_from(request).unwrap();
        assert_eq!(params.code_challenge_method, Some(CodeChallengeMethod::S256));
    }

    #[test]
    fn test_authorize_method_without_challenge_rejected() {
        let mut request = authorize_request();
        request.code_challenge_method = Some("plain".to_string());
        assert!(AuthorizationParams::try_from(request).is_err());
    }

    #[test]
    fn test_authorize_rejects_relative_redirect() {
        let mut request = authorize_request();
        request.redirect_uri = Some("/callback".to_string());
        assert!(AuthorizationParams::try_from(request).is_err());
    }

    #[test]
    fn test_token_request_authorization_code() {
        let form = TokenRequestForm {
            grant_type: Some("authorization_code".to_string()),
            code: Some("abc".to_string()),
            redirect_uri: Some("https://app/cb".to_string()),
            client_id: Some("c1".to_string()),
            code_verifier: Some("verifier123".to_string()),
            ..Default::default()
        };
        let request = TokenRequest::try_from(form).unwrap();
        assert_eq!(request.grant_type(), "authorization_code");
        assert_eq!(request.client_id(), "c1");
    }

    #[test]
    fn test_token_request_missing_parameters() {
        let form = TokenRequestForm {
            grant_type: Some("authorization_code".to_string()),
            client_id: Some("c1".to_string()),
            ..Default::default()
        };
        let err = TokenRequest::try_from(form).unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");

        let form = TokenRequestForm {
            grant_type: Some("refresh_token".to_string()),
            refresh_token: Some("rt".to_string()),
            ..Default::default()
        };
        assert!(TokenRequest::try_from(form).is_err());
    }

    #[test]
    fn test_token_request_unsupported_grant() {
        let form = TokenRequestForm {
            grant_type: Some("password".to_string()),
            ..Default::default()
        };
        let err = TokenRequest::try_from(form).unwrap_err();
        assert_eq!(err.error_code(), "unsupported_grant_type");
    }

    #[test]
    fn test_scope_includes_openid() {
        assert!(scope_includes_openid("openid profile"));
        assert!(scope_includes_openid("profile openid"));
        assert!(!scope_includes_openid("profile openidx"));
        assert!(!scope_includes_openid(""));
    }

    #[test]
    fn test_token_type_hint_parse() {
        assert_eq!(
            TokenTypeHint::parse(Some("refresh_token")),
            Some(TokenTypeHint::RefreshToken)
        );
        assert_eq!(TokenTypeHint::parse(Some("id_token")), None);
        assert_eq!(TokenTypeHint::parse(None), None);
    }

    #[test]
    fn test_consent_approval_values() {
        let mut form = ConsentForm {
            client_id: None,
            redirect_uri: None,
            scope: None,
            state: None,
            code_challenge: None,
            code_challenge_method: None,
            nonce: None,
            approve: Some("1".to_string()),
        };
        assert!(form.is_approved());
        form.approve = Some("0".to_string());
        assert!(!form.is_approved());
        form.approve = None;
        assert!(!form.is_approved());
    }
}
