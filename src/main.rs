//! pkce-bridge - OAuth2 Authorization Code + PKCE bridge
//!
//! Lets PKCE-speaking clients complete the authorization-code flow against
//! providers that only accept a plain client secret.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use pkce_bridge::{bridge::Bridge, cli::Cli, config::Config, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    // Pick up a local .env before clap and figment read the environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            if cli.insecure_cookies {
                config.server.cookie_secure = false;
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "Starting PKCE bridge"
    );

    let bridge = match Bridge::new(config) {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to create bridge: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = bridge.run().await {
        error!("Bridge error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Bridge shutdown complete");
    ExitCode::SUCCESS
}
