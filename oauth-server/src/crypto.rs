//! Secure token generation and comparison
//!
//! Authorization codes, access tokens and refresh tokens are all drawn from
//! the OS-seeded thread RNG and encoded as URL-safe base64 without padding.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Entropy of every generated token, in bytes
pub const TOKEN_BYTES: usize = 32;

/// Generate an unguessable token (256 bits of randomness)
pub fn generate_secure_token() -> String {
    generate_secure_token_with_length(TOKEN_BYTES)
}

/// Generate a token with custom entropy
pub fn generate_secure_token_with_length(bytes: usize) -> String {
    let mut token_bytes = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut token_bytes);

    URL_SAFE_NO_PAD.encode(&token_bytes)
}

/// Compare two secrets without leaking the position of the first mismatch
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_secure_token_length() {
        // 32 bytes -> 43 base64url chars without padding
        assert_eq!(generate_secure_token().len(), 43);
        assert_eq!(generate_secure_token_with_length(16).len(), 22);
    }

    #[test]
    fn test_generate_secure_token_charset() {
        let token = generate_secure_token();
        for c in token.chars() {
            assert!(c.is_ascii_alphanumeric() || c == '-' || c == '_');
        }
    }

    #[test]
    fn test_tokens_are_unique() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate_secure_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secreT"));
        assert!(!constant_time_eq("secret", "secret-longer"));
        assert!(!constant_time_eq("", "x"));
        assert!(constant_time_eq("", ""));
    }
}
