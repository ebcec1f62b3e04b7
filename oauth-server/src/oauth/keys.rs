//! ID token signing keys
//!
//! A single RSA key pair signs every ID token with RS256. The public half is
//! published as a JWK Set so relying parties can verify signatures without
//! contacting the server again.

use std::path::Path;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::oauth::error::OAuthError;

/// Key identifier used when none is configured
pub const DEFAULT_KEY_ID: &str = "oauth-server-key-1";

/// Modulus size of generated keys
pub const RSA_KEY_BITS: usize = 2048;

/// Signing key errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Key generation failed: {0}")]
    Generation(#[from] rsa::Error),

    #[error("Failed to read key file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid private key PEM: {0}")]
    InvalidPem(String),

    #[error("Key encoding failed: {0}")]
    Encoding(String),

    #[error("Signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl From<KeyError> for OAuthError {
    fn from(err: KeyError) -> Self {
        OAuthError::ServerError(err.to_string())
    }
}

/// Public RSA key in JWK form (RFC 7517)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    pub kid: String,
    pub n: String,
    pub e: String,
}

/// JWK Set document served at `/.well-known/jwks.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// Holds the active signing key
///
/// Built once at startup and shared through `Arc`; there is no global key.
pub struct SigningKeyManager {
    kid: String,
    encoding_key: EncodingKey,
    public_jwk: Jwk,
}

impl std::fmt::Debug for SigningKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyManager")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl SigningKeyManager {
    /// Generate a fresh key pair. Tokens signed by a previous process stop verifying.
    pub fn generate(kid: impl Into<String>) -> Result<Self, KeyError> {
        let kid = kid.into();
        let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, RSA_KEY_BITS)?;
        info!(kid = %kid, bits = RSA_KEY_BITS, "Generated RSA signing key");
        Self::from_private_key(&private_key, kid)
    }

    /// Load a PKCS#8 or PKCS#1 PEM private key from disk
    pub fn from_pem_file(path: impl AsRef<Path>, kid: impl Into<String>) -> Result<Self, KeyError> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path)?;
        let manager = Self::from_pem(&pem, kid)?;
        info!(kid = %manager.kid, path = %path.display(), "Loaded RSA signing key");
        Ok(manager)
    }

    /// Parse a PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`) PEM
    pub fn from_pem(pem: &str, kid: impl Into<String>) -> Result<Self, KeyError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| KeyError::InvalidPem(e.to_string()))?;
        Self::from_private_key(&private_key, kid)
    }

    pub fn from_private_key(
        private_key: &RsaPrivateKey,
        kid: impl Into<String>,
    ) -> Result<Self, KeyError> {
        let kid = kid.into();
        let der = private_key
            .to_pkcs1_der()
            .map_err(|e| KeyError::Encoding(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_der(der.as_bytes());

        let public_jwk = Jwk {
            kty: "RSA".to_string(),
            use_: "sig".to_string(),
            alg: "RS256".to_string(),
            kid: kid.clone(),
            n: URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
        };

        Ok(Self {
            kid,
            encoding_key,
            public_jwk,
        })
    }

    /// Identifier placed in every JWT header
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Sign claims as a compact RS256 JWT carrying this key's `kid`
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, KeyError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        Ok(jsonwebtoken::encode(&header, claims, &self.encoding_key)?)
    }

    pub fn public_jwk(&self) -> &Jwk {
        &self.public_jwk
    }

    /// JWK Set containing the active public key
    pub fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: vec![self.public_jwk.clone()],
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::{Arc, OnceLock};

    static TEST_KEY: OnceLock<RsaPrivateKey> = OnceLock::new();

    /// Key generation is slow; unit tests share one key pair.
    pub(crate) fn test_key_manager() -> Arc<SigningKeyManager> {
        let key = TEST_KEY.get_or_init(|| {
            RsaPrivateKey::new(&mut rand::rngs::OsRng, RSA_KEY_BITS).expect("test key generation")
        });
        Arc::new(SigningKeyManager::from_private_key(key, DEFAULT_KEY_ID).expect("test key"))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_key_manager;
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation};

    #[derive(Debug, Serialize, Deserialize)]
    struct Claims {
        sub: String,
        aud: String,
        exp: i64,
    }

    #[test]
    fn test_jwk_shape() {
        let manager = test_key_manager();
        let jwk = manager.public_jwk();

        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.use_, "sig");
        assert_eq!(jwk.alg, "RS256");
        assert_eq!(jwk.kid, DEFAULT_KEY_ID);
        // 65537
        assert_eq!(jwk.e, "AQAB");
        assert!(!jwk.n.contains('='));

        let json = serde_json::to_value(manager.jwks()).unwrap();
        assert_eq!(json["keys"][0]["use"], "sig");
    }

    #[test]
    fn test_signed_token_verifies_with_published_key() {
        let manager = test_key_manager();
        let claims = Claims {
            sub: "user-1".to_string(),
            aud: "client-1".to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        let token = manager.sign(&claims).unwrap();

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some(DEFAULT_KEY_ID));

        let jwk = manager.public_jwk();
        let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e).unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["client-1"]);
        let decoded = jsonwebtoken::decode::<Claims>(&token, &key, &validation).unwrap();
        assert_eq!(decoded.claims.sub, "user-1");
    }

    #[test]
    fn test_invalid_pem_rejected() {
        let err = SigningKeyManager::from_pem("not a key", DEFAULT_KEY_ID).unwrap_err();
        assert!(matches!(err, KeyError::InvalidPem(_)));
    }

    #[test]
    fn test_pem_round_trip_keeps_public_key() {
        use rsa::pkcs8::{EncodePrivateKey, LineEnding};

        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
        let manager = SigningKeyManager::from_pem(&pem, "k2").unwrap();

        assert_eq!(manager.kid(), "k2");
        assert_eq!(
            manager.public_jwk().n,
            URL_SAFE_NO_PAD.encode(key.n().to_bytes_be())
        );
    }
}
