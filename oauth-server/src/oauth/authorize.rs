//! Authorization Endpoint
//!
//! `Requested -> (login) -> AwaitingConsent -> CodeIssued | Denied`
//!
//! Client and redirect URI are verified before anything is redirected, so a
//! bad request is answered directly and never bounced to an unregistered URI.

use axum::{
    Form,
    extract::{
        OriginalUri, Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    http::HeaderMap,
    response::{Html, IntoResponse, Redirect, Response},
};
use chrono::Utc;
use tracing::{debug, info};
use url::Url;

use crate::crypto::generate_secure_token;
use crate::oauth::OAuthState;
use crate::oauth::error::OAuthError;
use crate::oauth::models::{
    AuthorizationCode, AuthorizationParams, AuthorizeRequest, ConsentForm, OAuthClient,
};
use crate::session::Principal;

/// Result of driving an authorization request one step
#[derive(Debug)]
pub enum AuthorizationOutcome {
    /// No authenticated user; send the browser to the login page
    LoginRequired { location: String },
    /// Ask the user to approve or deny
    AwaitingConsent {
        client_name: String,
        params: AuthorizationParams,
    },
    /// Send the browser back to the client with `code` or `error`
    Redirect { location: String },
}

impl IntoResponse for AuthorizationOutcome {
    fn into_response(self) -> Response {
        match self {
            AuthorizationOutcome::LoginRequired { location }
            | AuthorizationOutcome::Redirect { location } => Redirect::to(&location).into_response(),
            AuthorizationOutcome::AwaitingConsent {
                client_name,
                params,
            } => Html(render_consent_form(&client_name, &params)).into_response(),
        }
    }
}

/// GET /oauth/authorize - Display authorization consent form
///
/// # Query Parameters
/// - `response_type`: Must be "code"
/// - `client_id`: Registered client identifier
/// - `redirect_uri`: Must exactly match one of the client's registered URIs
/// - `scope`: (Optional) Space-separated scopes, defaults to `profile`
/// - `state`: (Optional) Opaque value echoed back to the client
/// - `code_challenge`, `code_challenge_method`: PKCE, required for public clients
/// - `nonce`: (Optional) OIDC replay binding copied into the ID token
///
/// # Example
/// ```text
/// GET /oauth/authorize?
///   response_type=code&
///   client_id=c1&
///   redirect_uri=https://app/cb&
///   scope=openid profile&
///   state=xyz&
///   code_challenge=E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM&
///   code_challenge_method=S256
/// ```
pub async fn authorize_get(
    State(state): State<OAuthState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    query: Result<Query<AuthorizeRequest>, QueryRejection>,
) -> Result<AuthorizationOutcome, OAuthError> {
    let Query(request) = query?;
    let principal = state.session.resolve(&headers);
    begin_authorization(&state, request, principal.as_ref(), &uri.to_string()).await
}

/// POST /oauth/authorize - User consent submission
///
/// Carries the GET parameters as hidden fields plus `approve` ("1" approves).
pub async fn authorize_post(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    form: Result<Form<ConsentForm>, FormRejection>,
) -> Result<AuthorizationOutcome, OAuthError> {
    let Form(form) = form?;
    let principal = state.session.resolve(&headers);
    complete_authorization(&state, form, principal.as_ref()).await
}

/// Validate the request and decide whether to ask for login or consent
pub async fn begin_authorization(
    state: &OAuthState,
    request: AuthorizeRequest,
    principal: Option<&Principal>,
    original_uri: &str,
) -> Result<AuthorizationOutcome, OAuthError> {
    let (client, params) = validate_authorization(state, request).await?;

    if principal.is_none() {
        debug!(client_id = %params.client_id, "Authorization requires login");
        return Ok(AuthorizationOutcome::LoginRequired {
            location: login_location(&state.config.login_url, original_uri),
        });
    }

    Ok(AuthorizationOutcome::AwaitingConsent {
        client_name: client.client_name,
        params,
    })
}

/// Apply the user's consent decision
pub async fn complete_authorization(
    state: &OAuthState,
    form: ConsentForm,
    principal: Option<&Principal>,
) -> Result<AuthorizationOutcome, OAuthError> {
    let approved = form.is_approved();
    let (_, params) = validate_authorization(state, form.to_authorize_request()).await?;

    let user = match principal {
        Some(principal) => state.storage.find_user(&principal.user_id).await?,
        None => None,
    };
    let Some(user) = user else {
        debug!(client_id = %params.client_id, "Consent submitted without a known user");
        return Ok(AuthorizationOutcome::LoginRequired {
            location: login_location(&state.config.login_url, &authorize_uri(&params)),
        });
    };

    if !approved {
        info!(client_id = %params.client_id, user_id = %user.id, "Authorization denied");
        return Ok(AuthorizationOutcome::Redirect {
            location: client_redirect(
                &params.redirect_uri,
                &[("error", OAuthError::AccessDenied.error_code())],
                params.state.as_deref(),
            )?,
        });
    }

    let now = Utc::now();
    let code = AuthorizationCode {
        code: generate_secure_token(),
        client_id: params.client_id.clone(),
        user_id: user.id.clone(),
        redirect_uri: params.redirect_uri.clone(),
        scope: params.scope.clone(),
        code_challenge: params.code_challenge.clone(),
        code_challenge_method: params.code_challenge_method,
        nonce: params.nonce.clone(),
        expires_at: now + state.config.authorization_code_ttl(),
        created_at: now,
    };
    state.storage.save_authorization_code(&code).await?;

    info!(
        client_id = %code.client_id,
        user_id = %code.user_id,
        scope = %code.scope,
        pkce = code.code_challenge.is_some(),
        "Authorization code issued"
    );

    Ok(AuthorizationOutcome::Redirect {
        location: client_redirect(
            &params.redirect_uri,
            &[("code", code.code.as_str())],
            params.state.as_deref(),
        )?,
    })
}

/// Validate parameters, client and redirect URI; every failure is a direct error
pub async fn validate_authorization(
    state: &OAuthState,
    request: AuthorizeRequest,
) -> Result<(OAuthClient, AuthorizationParams), OAuthError> {
    let params = AuthorizationParams::try_from(request)?;

    let client = state
        .clients
        .find_client(&params.client_id)
        .await?
        .filter(|client| client.has_redirect_uri(&params.redirect_uri))
        .ok_or_else(|| {
            debug!(client_id = %params.client_id, "Unknown client or unregistered redirect_uri");
            OAuthError::invalid_request("Invalid client or redirect URI")
        })?;

    if !client.is_confidential && params.code_challenge.is_none() {
        return Err(OAuthError::invalid_request(
            "code_challenge is required for public clients",
        ));
    }

    Ok((client, params))
}

fn login_location(login_url: &str, return_to: &str) -> String {
    let separator = if login_url.contains('?') { '&' } else { '?' };
    format!(
        "{login_url}{separator}redirect={}",
        urlencoding::encode(return_to)
    )
}

/// Rebuild the GET URL of an authorization request
fn authorize_uri(params: &AuthorizationParams) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("response_type", "code")
        .append_pair("client_id", &params.client_id)
        .append_pair("redirect_uri", &params.redirect_uri)
        .append_pair("scope", &params.scope);
    if let Some(state) = &params.state {
        query.append_pair("state", state);
    }
    if let Some(nonce) = &params.nonce {
        query.append_pair("nonce", nonce);
    }
    if let Some(challenge) = &params.code_challenge {
        query.append_pair("code_challenge", challenge);
    }
    if let Some(method) = params.code_challenge_method {
        query.append_pair("code_challenge_method", method.as_str());
    }
    format!("/oauth/authorize?{}", query.finish())
}

fn client_redirect(
    redirect_uri: &str,
    pairs: &[(&str, &str)],
    state: Option<&str>,
) -> Result<String, OAuthError> {
    let mut url = Url::parse(redirect_uri)
        .map_err(|_| OAuthError::invalid_request("redirect_uri must be an absolute URL"))?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in pairs {
            query.append_pair(key, value);
        }
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    Ok(url.to_string())
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn hidden_input(name: &str, value: Option<&str>) -> String {
    format!(
        r#"<input type="hidden" name="{name}" value="{}">"#,
        escape_html(value.unwrap_or_default())
    )
}

/// Render HTML consent form
fn render_consent_form(client_name: &str, params: &AuthorizationParams) -> String {
    let scopes = params
        .scope
        .split_whitespace()
        .map(|s| format!("<div class='scope-item'>• {}</div>", escape_html(s)))
        .collect::<Vec<_>>()
        .join("\n");

    let hidden = [
        hidden_input("client_id", Some(params.client_id.as_str())),
        hidden_input("redirect_uri", Some(params.redirect_uri.as_str())),
        hidden_input("scope", Some(params.scope.as_str())),
        hidden_input("state", params.state.as_deref()),
        hidden_input("nonce", params.nonce.as_deref()),
        hidden_input("code_challenge", params.code_challenge.as_deref()),
        hidden_input(
            "code_challenge_method",
            params.code_challenge_method.map(|m| m.as_str()),
        ),
    ]
    .join("\n            ");

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Authorization Request</title>
    <style>
        body {{ font-family: Arial, sans-serif; max-width: 500px; margin: 50px auto; padding: 20px; }}
        .consent-box {{ border: 1px solid #ccc; padding: 20px; border-radius: 5px; }}
        .scopes {{ margin: 20px 0; }}
        .scope-item {{ padding: 5px 0; }}
        button {{ padding: 10px 20px; margin-right: 10px; cursor: pointer; }}
    </style>
</head>
<body>
    <div class="consent-box">
        <h2>{} is requesting access to your account</h2>
        <div class="scopes">
            <p><strong>Requested Permissions:</strong></p>
            {}
        </div>

        <form method="POST" action="/oauth/authorize">
            {}

            <button type="submit" name="approve" value="1">Approve</button>
            <button type="submit" name="approve" value="0">Deny</button>
        </form>
    </div>
</body>
</html>"#,
        escape_html(client_name),
        scopes,
        hidden,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::pkce::{CodeChallengeMethod, s256_challenge};
    use crate::oauth::test_support::{CLIENT_ID, REDIRECT_URI, USER_ID, seeded_state};

    fn principal() -> Principal {
        Principal {
            user_id: USER_ID.to_string(),
        }
    }

    fn request() -> AuthorizeRequest {
        AuthorizeRequest {
            response_type: Some("code".to_string()),
            client_id: Some(CLIENT_ID.to_string()),
            redirect_uri: Some(REDIRECT_URI.to_string()),
            scope: Some("openid profile".to_string()),
            state: Some("xyz".to_string()),
            code_challenge: Some(s256_challenge("verifier123")),
            code_challenge_method: Some("S256".to_string()),
            nonce: Some("n-1".to_string()),
        }
    }

    fn consent(approve: &str) -> ConsentForm {
        let request = request();
        ConsentForm {
            client_id: request.client_id,
            redirect_uri: request.redirect_uri,
            scope: request.scope,
            state: request.state,
            code_challenge: request.code_challenge,
            code_challenge_method: request.code_challenge_method,
            nonce: request.nonce,
            approve: Some(approve.to_string()),
        }
    }

    fn query_value(location: &str, key: &str) -> Option<String> {
        Url::parse(location)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[tokio::test]
    async fn test_unknown_client_is_direct_error() {
        let state = seeded_state().await;
        let mut request = request();
        request.client_id = Some("nobody".to_string());

        let err = begin_authorization(&state, request, Some(&principal()), "/oauth/authorize")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_unregistered_redirect_is_direct_error() {
        let state = seeded_state().await;
        let mut request = request();
        request.redirect_uri = Some("https://app/cb/extra".to_string());

        assert!(
            begin_authorization(&state, request, Some(&principal()), "/oauth/authorize")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_public_client_requires_pkce() {
        let state = seeded_state().await;
        let mut client = state.clients.find_client(CLIENT_ID).await.unwrap().unwrap();
        client.is_confidential = false;
        state.storage.save_client(&client).await.unwrap();

        let mut request = request();
        request.code_challenge = None;
        request.code_challenge_method = None;
        let err = validate_authorization(&state, request).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_login_required_without_principal() {
        let state = seeded_state().await;
        let outcome = begin_authorization(&state, request(), None, "/oauth/authorize?client_id=c1")
            .await
            .unwrap();

        match outcome {
            AuthorizationOutcome::LoginRequired { location } => {
                assert_eq!(
                    location,
                    "/auth/login?redirect=%2Foauth%2Fauthorize%3Fclient_id%3Dc1"
                );
            }
            other => panic!("expected login redirect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_consent_prompt_carries_parameters() {
        let state = seeded_state().await;
        let outcome = begin_authorization(&state, request(), Some(&principal()), "/")
            .await
            .unwrap();

        let AuthorizationOutcome::AwaitingConsent { client_name, params } = outcome else {
            panic!("expected consent prompt");
        };
        assert_eq!(client_name, "Test App");
        assert_eq!(params.nonce.as_deref(), Some("n-1"));

        let html = render_consent_form(&client_name, &params);
        assert!(html.contains(r#"name="code_challenge_method" value="S256""#));
        assert!(html.contains(r#"name="state" value="xyz""#));
    }

    #[tokio::test]
    async fn test_approval_issues_bound_code() {
        let state = seeded_state().await;
        let outcome = complete_authorization(&state, consent("1"), Some(&principal()))
            .await
            .unwrap();

        let AuthorizationOutcome::Redirect { location } = outcome else {
            panic!("expected redirect");
        };
        assert!(location.starts_with(REDIRECT_URI));
        assert_eq!(query_value(&location, "state").as_deref(), Some("xyz"));

        let code = query_value(&location, "code").unwrap();
        let stored = state
            .storage
            .find_authorization_code(&code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_id, USER_ID);
        assert_eq!(stored.scope, "openid profile");
        assert_eq!(stored.nonce.as_deref(), Some("n-1"));
        assert_eq!(stored.code_challenge_method, Some(CodeChallengeMethod::S256));
        let ttl = stored.expires_at - stored.created_at;
        assert_eq!(ttl.num_seconds(), 600);
    }

    #[tokio::test]
    async fn test_denial_redirects_with_access_denied() {
        let state = seeded_state().await;
        let outcome = complete_authorization(&state, consent("0"), Some(&principal()))
            .await
            .unwrap();

        let AuthorizationOutcome::Redirect { location } = outcome else {
            panic!("expected redirect");
        };
        assert_eq!(query_value(&location, "error").as_deref(), Some("access_denied"));
        assert_eq!(query_value(&location, "state").as_deref(), Some("xyz"));
        assert!(query_value(&location, "code").is_none());
    }

    #[tokio::test]
    async fn test_consent_without_known_user_requires_login() {
        let state = seeded_state().await;
        let stranger = Principal {
            user_id: "ghost".to_string(),
        };
        let outcome = complete_authorization(&state, consent("1"), Some(&stranger))
            .await
            .unwrap();
        assert!(matches!(outcome, AuthorizationOutcome::LoginRequired { .. }));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#""><script>"#),
            "&quot;&gt;&lt;script&gt;"
        );
    }
}
