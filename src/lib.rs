//! PKCE Bridge Library
//!
//! An OAuth2 Authorization Code intermediary that retrofits PKCE (RFC 7636)
//! onto providers that only support the plain client-secret flow. Public
//! clients speak PKCE to the bridge; the bridge holds the real client
//! secret and speaks the classic flow to the provider.
//!
//! # Flow
//!
//! - **`GET /authorize`** — captures the challenge and the client's redirect
//!   URI in cookies, forwards the user to the provider
//! - **`GET /code`** — binds the provider's authorization code to the
//!   challenge, redirects back to the client
//! - **`POST /access_token`** — verifies the verifier against the bound
//!   challenge, injects the real secret, relays the provider's response
//! - **`POST /refresh_access_token`** — injects the secret on refresh, relays
//!
//! The `x_`-prefixed parameters (`x_authorize_url`, `x_client_secret`,
//! `x_access_token_uri`) address the bridge itself and never reach the
//! provider.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod cli;
pub mod config;
pub mod cookies;
pub mod error;
pub mod pkce;
pub mod store;
pub mod upstream;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
