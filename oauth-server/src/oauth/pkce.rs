//! PKCE (Proof Key for Code Exchange) Implementation
//!
//! RFC 7636: Proof Key for Code Exchange by OAuth Public Clients.
//! Supports the `S256` and `plain` transformations.

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

use crate::crypto::constant_time_eq;
use crate::oauth::error::OAuthError;

/// Code challenge transformation (RFC 7636 Section 4.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    /// BASE64URL(SHA256(ASCII(code_verifier)))
    S256,
    /// code_challenge = code_verifier
    Plain,
}

impl CodeChallengeMethod {
    /// Wire name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::S256 => "S256",
            CodeChallengeMethod::Plain => "plain",
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(CodeChallengeMethod::S256),
            "plain" => Ok(CodeChallengeMethod::Plain),
            other => Err(OAuthError::invalid_request(format!(
                "code_challenge_method '{other}' is not supported"
            ))),
        }
    }
}

/// Compute the S256 challenge for a verifier
pub fn s256_challenge(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Verify a presented code_verifier against the stored challenge
///
/// The comparison is constant-time over the encoded challenge.
pub fn verify_pkce(method: CodeChallengeMethod, code_verifier: &str, code_challenge: &str) -> bool {
    match method {
        CodeChallengeMethod::S256 => constant_time_eq(&s256_challenge(code_verifier), code_challenge),
        CodeChallengeMethod::Plain => constant_time_eq(code_verifier, code_challenge),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_verification_success() {
        // Test vector from RFC 7636 Appendix B
        let code_verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let code_challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

        assert!(verify_pkce(CodeChallengeMethod::S256, code_verifier, code_challenge));
    }

    #[test]
    fn test_pkce_verification_failure() {
        let code_verifier = "wrong_verifier_123456789012345678901234567890";
        let code_challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

        assert!(!verify_pkce(CodeChallengeMethod::S256, code_verifier, code_challenge));
    }

    #[test]
    fn test_plain_method() {
        assert!(verify_pkce(CodeChallengeMethod::Plain, "verifier123", "verifier123"));
        assert!(!verify_pkce(CodeChallengeMethod::Plain, "verifier123", "verifier124"));
        // plain never hashes
        assert!(!verify_pkce(
            CodeChallengeMethod::Plain,
            "verifier123",
            &s256_challenge("verifier123")
        ));
    }

    #[test]
    fn test_s256_challenge_has_no_padding() {
        let challenge = s256_challenge("verifier123");
        assert_eq!(challenge.len(), 43);
        assert!(!challenge.contains('='));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("S256".parse::<CodeChallengeMethod>().unwrap(), CodeChallengeMethod::S256);
        assert_eq!("plain".parse::<CodeChallengeMethod>().unwrap(), CodeChallengeMethod::Plain);
        assert!("s256".parse::<CodeChallengeMethod>().is_err());
        assert!("S512".parse::<CodeChallengeMethod>().is_err());
    }
}
