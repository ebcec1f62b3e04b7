//! Resource-owner session resolution
//!
//! Login and session management live outside this server. A fronting
//! component authenticates the user and the server only asks a
//! [`SessionResolver`] who, if anyone, is behind a request.

use axum::http::{HeaderMap, HeaderName};

/// Default header carrying the authenticated user id
pub const DEFAULT_SESSION_HEADER: &str = "x-authenticated-user";

/// Authenticated resource owner bound to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
}

/// Maps an incoming request to its authenticated principal
pub trait SessionResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Option<Principal>;
}

/// Trusts a header set by an authenticating reverse proxy
///
/// Only deploy behind a proxy that strips this header from client traffic.
#[derive(Debug, Clone)]
pub struct TrustedHeaderSession {
    header: HeaderName,
}

impl TrustedHeaderSession {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Default for TrustedHeaderSession {
    fn default() -> Self {
        Self::new(HeaderName::from_static(DEFAULT_SESSION_HEADER))
    }
}

impl SessionResolver for TrustedHeaderSession {
    fn resolve(&self, headers: &HeaderMap) -> Option<Principal> {
        let user_id = headers.get(&self.header)?.to_str().ok()?.trim();
        if user_id.is_empty() {
            return None;
        }
        Some(Principal {
            user_id: user_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_resolves_trusted_header() {
        let mut headers = HeaderMap::new();
        headers.insert(DEFAULT_SESSION_HEADER, HeaderValue::from_static("user-1"));

        let principal = TrustedHeaderSession::default().resolve(&headers).unwrap();
        assert_eq!(principal.user_id, "user-1");
    }

    #[test]
    fn test_missing_or_blank_header() {
        let session = TrustedHeaderSession::default();
        assert!(session.resolve(&HeaderMap::new()).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(DEFAULT_SESSION_HEADER, HeaderValue::from_static("  "));
        assert!(session.resolve(&headers).is_none());
    }

    #[test]
    fn test_custom_header_name() {
        let session = TrustedHeaderSession::new(HeaderName::from_static("x-user"));
        let mut headers = HeaderMap::new();
        headers.insert(DEFAULT_SESSION_HEADER, HeaderValue::from_static("user-1"));
        assert!(session.resolve(&headers).is_none());

        headers.insert("x-user", HeaderValue::from_static("user-2"));
        assert_eq!(session.resolve(&headers).unwrap().user_id, "user-2");
    }
}
