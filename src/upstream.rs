//! Outbound HTTP — the forwarder that carries token requests upstream.
//!
//! One pooled `reqwest` client per process, with bounded connect and
//! request timeouts so a hung provider cannot pin bridge workers. Upstream
//! HTTP error statuses are *data* to be relayed, not failures; only
//! transport problems (DNS, refused connection, timeout) surface as `Err`.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::{Error, Result};

/// An upstream response captured for verbatim relay.
#[derive(Debug)]
pub struct Relayed {
    /// Upstream HTTP status code.
    pub status: u16,
    /// Upstream `Content-Type`, when present and readable.
    pub content_type: Option<String>,
    /// Upstream body, relayed as-is.
    pub body: String,
}

/// Shared HTTP client for provider token endpoints.
#[derive(Clone)]
pub struct Forwarder {
    client: Client,
}

impl Forwarder {
    /// Build a forwarder with the configured timeouts.
    pub fn new(request_timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// POST `fields` as `application/x-www-form-urlencoded` and capture the
    /// response for relay.
    ///
    /// Field multiplicity and order are preserved on the wire.
    pub async fn post_form(&self, url: &Url, fields: &[(String, String)]) -> Result<Relayed> {
        debug!(host = url.host_str().unwrap_or("?"), "Forwarding form POST upstream");

        let response = self.client.post(url.as_str()).form(fields).send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(Relayed {
            status,
            content_type,
            body,
        })
    }
}
