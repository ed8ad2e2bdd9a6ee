//! Bridge server lifecycle: startup checks, the listener loop, and
//! graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use url::Url;

use super::handlers::{AppState, create_router};
use crate::config::Config;
use crate::store::{ChallengeStore, InMemoryChallengeStore, spawn_reaper};
use crate::upstream::Forwarder;
use crate::{Error, Result};

/// The assembled bridge, ready to serve.
pub struct Bridge {
    config: Config,
    store: Arc<dyn ChallengeStore>,
    forwarder: Forwarder,
    public_url: Option<Url>,
}

impl Bridge {
    /// Build a bridge from configuration with the default in-memory
    /// challenge store.
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(InMemoryChallengeStore::new(config.store.ttl));
        Self::with_store(config, store)
    }

    /// Build a bridge around a caller-provided challenge store.
    pub fn with_store(config: Config, store: Arc<dyn ChallengeStore>) -> Result<Self> {
        let public_url = config
            .server
            .public_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| Error::Config(format!("Invalid public_url: {e}")))?;

        let forwarder = Forwarder::new(
            config.upstream.request_timeout,
            config.upstream.connect_timeout,
        )?;

        Ok(Self {
            config,
            store,
            forwarder,
            public_url,
        })
    }

    /// Serve until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let host = self
            .config
            .server
            .host
            .parse()
            .map_err(|e| Error::Config(format!("Invalid server host: {e}")))?;
        let addr = SocketAddr::new(host, self.config.server.port);

        // The store must be reachable before we accept any traffic.
        self.store.ping().await?;

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        spawn_reaper(
            Arc::clone(&self.store),
            self.config.store.reap_interval,
            shutdown_tx.subscribe(),
        );

        let state = Arc::new(AppState {
            store: Arc::clone(&self.store),
            forwarder: self.forwarder.clone(),
            cookie_secure: self.config.server.cookie_secure,
            public_url: self.public_url.clone(),
        });
        let app = create_router(state);

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("PKCE BRIDGE v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = self.config.server.port, "Listening");
        info!("  GET  /authorize             (client entry point)");
        info!("  GET  /code                  (provider redirect target)");
        info!("  POST /access_token          (token exchange)");
        info!("  POST /refresh_access_token  (refresh relay)");
        match &self.public_url {
            Some(url) => info!(public_url = %url, "Redirect target taken from configuration"),
            None => info!("Redirect target derived from forwarding headers"),
        }
        if !self.config.server.cookie_secure {
            warn!("Cookies are issued WITHOUT the Secure attribute; for local use only");
        }
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await?;

        info!("Bridge stopped");
        Ok(())
    }
}

/// Resolves when Ctrl+C or SIGTERM arrives, then tells background tasks
/// to wind down.
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
