//! OAuth 2.0 / OpenID Connect authorization server

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pulseengine_oauth_server::{LogFormat, OAuthConfig, server};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "oauth-server", version, about = "OAuth 2.0 / OpenID Connect authorization server")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "OAUTH_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:3001
    #[arg(long)]
    bind: Option<String>,

    /// Issuer URL placed in ID tokens and the discovery document
    #[arg(long)]
    issuer: Option<String>,

    /// Log filter directive
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn apply(self, config: &mut OAuthConfig) {
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(issuer) = self.issuer {
            config.issuer = issuer;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        OAuthConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    config
        .logging
        .initialize()
        .context("Failed to initialize logging")?;
    info!(version = pulseengine_oauth_server::VERSION, "Starting OAuth server");

    let state = server::bootstrap(&config)
        .await
        .context("Failed to initialize server state")?;
    server::serve(&config, state).await?;

    Ok(())
}
