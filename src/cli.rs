//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// OAuth2 Authorization Code + PKCE bridge
#[derive(Parser, Debug)]
#[command(name = "pkce-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "PKCE_BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "PKCE_BRIDGE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "PKCE_BRIDGE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "PKCE_BRIDGE_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "PKCE_BRIDGE_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Issue cookies without the Secure attribute (local development over plain HTTP)
    #[arg(long, env = "PKCE_BRIDGE_INSECURE_COOKIES")]
    pub insecure_cookies: bool,
}
