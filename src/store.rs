//! Challenge binding store — persistence for code → challenge bindings.
//!
//! The [`ChallengeStore`] trait abstracts over storage backends. The only
//! current implementation is [`InMemoryChallengeStore`], backed by a
//! `DashMap` with a background reaper that evicts expired bindings.
//!
//! # Design
//!
//! A binding lives from the moment the provider redirects back through
//! `/code` until either the token exchange succeeds or the TTL runs out.
//! Every trait method is fallible so a networked backend can surface
//! outages as HTTP 500s instead of panics; `ping` runs once at startup and
//! aborts the server if the backend is unreachable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::Result;

/// Default lifetime of a code → challenge binding.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Trait abstracting the challenge binding storage backend.
///
/// Implementations must be `Send + Sync` because the store is shared across
/// async tasks.
#[async_trait::async_trait]
pub trait ChallengeStore: Send + Sync + 'static {
    /// Bind an authorization code to its PKCE challenge.
    ///
    /// A second `set` for the same code replaces the binding and restarts
    /// its TTL.
    async fn set(&self, code: &str, challenge: &str) -> Result<()>;

    /// Look up the challenge bound to a code.
    ///
    /// Returns `Ok(None)` if the code was never bound or the binding expired.
    async fn get(&self, code: &str) -> Result<Option<String>>;

    /// Drop the binding for a code. Unknown codes are a no-op.
    async fn delete(&self, code: &str) -> Result<()>;

    /// Check that the backend is reachable.
    ///
    /// Called once before the server accepts traffic; a failure is fatal.
    async fn ping(&self) -> Result<()>;

    /// Remove all expired bindings. Called periodically by the reaper.
    async fn reap_expired(&self) -> Result<usize>;
}

struct Binding {
    challenge: String,
    expires_at: Instant,
}

/// In-memory challenge store backed by a `DashMap`.
///
/// Expired bindings are evicted lazily on `get` and in bulk by the
/// [`spawn_reaper`] background task.
pub struct InMemoryChallengeStore {
    bindings: DashMap<String, Binding>,
    ttl: Duration,
}

impl InMemoryChallengeStore {
    /// Create an empty store whose bindings live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            bindings: DashMap::new(),
            ttl,
        }
    }
}

impl Default for InMemoryChallengeStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[async_trait::async_trait]
impl ChallengeStore for InMemoryChallengeStore {
    async fn set(&self, code: &str, challenge: &str) -> Result<()> {
        self.bindings.insert(
            code.to_string(),
            Binding {
                challenge: challenge.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, code: &str) -> Result<Option<String>> {
        let Some(entry) = self.bindings.get(code) else {
            return Ok(None);
        };
        let expired = Instant::now() >= entry.expires_at;
        let challenge = entry.challenge.clone();
        drop(entry);

        if expired {
            // Lazy eviction: remove on access
            self.bindings.remove(code);
            debug!("Lazy-evicted expired challenge binding");
            return Ok(None);
        }

        Ok(Some(challenge))
    }

    async fn delete(&self, code: &str) -> Result<()> {
        self.bindings.remove(code);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        // Process-local memory is always reachable
        Ok(())
    }

    async fn reap_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .bindings
            .iter()
            .filter(|e| now >= e.value().expires_at)
            .map(|e| e.key().clone())
            .collect();

        let count = expired.len();
        for code in expired {
            self.bindings.remove(&code);
        }
        Ok(count)
    }
}

/// Spawn a background task that reaps expired bindings every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    store: Arc<dyn ChallengeStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.reap_expired().await {
                        Ok(reaped) if reaped > 0 => {
                            debug!(count = reaped, "Reaped expired challenge bindings");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Challenge reaper sweep failed"),
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Challenge reaper shutting down");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_returns_the_challenge() {
        // GIVEN: a store with one binding
        let store = InMemoryChallengeStore::new(Duration::from_secs(3600));
        store.set("code-1", "challenge-1").await.unwrap();

        // WHEN: we look the code up
        let found = store.get("code-1").await.unwrap();

        // THEN: the bound challenge comes back
        assert_eq!(found.as_deref(), Some("challenge-1"));
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_code() {
        // GIVEN: an empty store
        let store = InMemoryChallengeStore::default();

        // WHEN: we look up a code that was never bound
        let found = store.get("no-such-code").await.unwrap();

        // THEN: None
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn set_replaces_an_existing_binding() {
        // GIVEN: a code bound twice (client retried the flow)
        let store = InMemoryChallengeStore::default();
        store.set("code-1", "first").await.unwrap();
        store.set("code-1", "second").await.unwrap();

        // THEN: the later binding wins
        let found = store.get("code-1").await.unwrap();
        assert_eq!(found.as_deref(), Some("second"));
        assert_eq!(store.bindings.len(), 1);
    }

    #[tokio::test]
    async fn get_lazy_evicts_expired_binding() {
        // GIVEN: a store whose TTL is zero, so bindings expire immediately
        let store = InMemoryChallengeStore::new(Duration::ZERO);
        store.set("code-1", "challenge-1").await.unwrap();

        // WHEN: we try to retrieve the binding
        let found = store.get("code-1").await.unwrap();

        // THEN: it is gone and the entry was evicted
        assert!(found.is_none());
        assert_eq!(store.bindings.len(), 0);
    }

    #[tokio::test]
    async fn delete_removes_the_binding() {
        // GIVEN: a store with one binding
        let store = InMemoryChallengeStore::default();
        store.set("code-1", "challenge-1").await.unwrap();

        // WHEN: the binding is deleted
        store.delete("code-1").await.unwrap();

        // THEN: the code no longer resolves
        assert!(store.get("code-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_of_unknown_code_is_a_noop() {
        let store = InMemoryChallengeStore::default();
        store.delete("no-such-code").await.unwrap();
    }

    #[tokio::test]
    async fn reap_expired_removes_expired_bindings() {
        // GIVEN: a zero-TTL store with two bindings
        let store = InMemoryChallengeStore::new(Duration::ZERO);
        store.set("code-1", "a").await.unwrap();
        store.set("code-2", "b").await.unwrap();

        // WHEN: the reaper sweeps
        let reaped = store.reap_expired().await.unwrap();

        // THEN: both are removed
        assert_eq!(reaped, 2);
        assert_eq!(store.bindings.len(), 0);
    }

    #[tokio::test]
    async fn reap_expired_keeps_live_bindings() {
        // GIVEN: a store with a long TTL
        let store = InMemoryChallengeStore::new(Duration::from_secs(3600));
        store.set("code-1", "a").await.unwrap();

        // WHEN: the reaper sweeps
        let reaped = store.reap_expired().await.unwrap();

        // THEN: nothing is touched
        assert_eq!(reaped, 0);
        assert_eq!(store.get("code-1").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn ping_always_succeeds_for_memory() {
        let store = InMemoryChallengeStore::default();
        assert!(store.ping().await.is_ok());
    }
}
