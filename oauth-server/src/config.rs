//! Server configuration
//!
//! Built-in defaults, then an optional TOML file, then `OAUTH_*` environment
//! overrides. Command-line flags are applied on top by the binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use axum::http::HeaderName;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::logging::LoggingConfig;
use crate::oauth::keys::DEFAULT_KEY_ID;
use crate::oauth::models::{OAuthClient, User};
use crate::session::DEFAULT_SESSION_HEADER;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Records written to the store at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub clients: Vec<OAuthClient>,
    pub users: Vec<User>,
}

/// OAuth server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// `iss` of every ID token and base of the discovery document
    pub issuer: String,
    pub bind_address: String,
    /// Where unauthenticated users are sent from `/oauth/authorize`
    pub login_url: String,
    /// Header from which the authenticated user id is read
    pub session_header: String,
    pub signing_key_id: String,
    /// PEM private key; a fresh key is generated at startup when unset
    pub signing_key_path: Option<PathBuf>,
    pub authorization_code_ttl_secs: i64,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub id_token_ttl_secs: i64,
    /// Interval of the expired-record janitor
    pub janitor_interval_secs: u64,
    pub logging: LoggingConfig,
    pub seed: SeedConfig,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:3001".to_string(),
            bind_address: "0.0.0.0:3001".to_string(),
            login_url: "/auth/login".to_string(),
            session_header: DEFAULT_SESSION_HEADER.to_string(),
            signing_key_id: DEFAULT_KEY_ID.to_string(),
            signing_key_path: None,
            authorization_code_ttl_secs: 600,  // 10 minutes
            access_token_ttl_secs: 900,        // 15 minutes
            refresh_token_ttl_secs: 2_592_000, // 30 days
            id_token_ttl_secs: 3600,           // 1 hour
            janitor_interval_secs: 60,
            logging: LoggingConfig::default(),
            seed: SeedConfig::default(),
        }
    }
}

impl OAuthConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from an optional file, apply process environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `OAUTH_*` overrides from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(issuer) = lookup("OAUTH_ISSUER") {
            self.issuer = issuer;
        }
        if let Some(bind) = lookup("OAUTH_BIND_ADDRESS") {
            self.bind_address = bind;
        }
        if let Some(login_url) = lookup("OAUTH_LOGIN_URL") {
            self.login_url = login_url;
        }
        if let Some(path) = lookup("OAUTH_SIGNING_KEY_PATH") {
            self.signing_key_path = Some(PathBuf::from(path));
        }
        if let Some(kid) = lookup("OAUTH_SIGNING_KEY_ID") {
            self.signing_key_id = kid;
        }
        if let Some(level) = lookup("OAUTH_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.issuer)
            .map_err(|e| ConfigError::Invalid(format!("issuer '{}': {e}", self.issuer)))?;
        self.socket_addr()?;
        self.session_header_name()?;

        if self.login_url.trim().is_empty() {
            return Err(ConfigError::Invalid("login_url must not be empty".into()));
        }
        if self.signing_key_id.trim().is_empty() {
            return Err(ConfigError::Invalid("signing_key_id must not be empty".into()));
        }

        for (name, value) in [
            ("authorization_code_ttl_secs", self.authorization_code_ttl_secs),
            ("access_token_ttl_secs", self.access_token_ttl_secs),
            ("refresh_token_ttl_secs", self.refresh_token_ttl_secs),
            ("id_token_ttl_secs", self.id_token_ttl_secs),
        ] {
            if value <= 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.janitor_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "janitor_interval_secs must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Issuer without a trailing slash, used to build endpoint URLs
    pub fn issuer_base(&self) -> &str {
        self.issuer.trim_end_matches('/')
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address.parse().map_err(|e| {
            ConfigError::Invalid(format!("bind_address '{}': {e}", self.bind_address))
        })
    }

    pub fn session_header_name(&self) -> Result<HeaderName, ConfigError> {
        HeaderName::try_from(self.session_header.as_str()).map_err(|e| {
            ConfigError::Invalid(format!("session_header '{}': {e}", self.session_header))
        })
    }

    pub fn authorization_code_ttl(&self) -> Duration {
        Duration::seconds(self.authorization_code_ttl_secs)
    }

    pub fn access_token_ttl(&self) -> Duration {
        Duration::seconds(self.access_token_ttl_secs)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::seconds(self.refresh_token_ttl_secs)
    }

    pub fn id_token_ttl(&self) -> Duration {
        Duration::seconds(self.id_token_ttl_secs)
    }

    pub fn janitor_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.janitor_interval_secs)
    }
}
