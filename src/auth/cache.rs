//! Positive-result verification cache.
//!
//! Remembers `username -> last good password` for a bounded time.  A hit
//! requires the presented password to equal the cached one exactly; denials
//! and backend errors never touch the cache.

use std::time::Duration;

use anyhow::Result;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use crate::metrics::MetricsRegistry;

use super::credential::Credential;
use super::Verifier;

/// TTL applied when the configured value is zero.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    password: String,
    expires_at: Instant,
}

pub struct CachingVerifier {
    inner: Box<dyn Verifier>,
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
    metrics: MetricsRegistry,
}

impl CachingVerifier {
    pub fn new(inner: Box<dyn Verifier>, ttl: Duration, metrics: MetricsRegistry) -> Self {
        let ttl = if ttl.is_zero() { DEFAULT_TTL } else { ttl };
        Self {
            inner,
            ttl,
            entries: DashMap::new(),
            metrics,
        }
    }

    fn lookup(&self, credential: &Credential) -> bool {
        let username = credential.username.as_str();
        let now = Instant::now();

        // The shard read guard must be released before `remove_if` locks it.
        let expired = match self.entries.get(username) {
            Some(entry) if entry.expires_at > now => {
                return entry.password == credential.password.as_str();
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries
                .remove_if(username, |_, entry| entry.expires_at <= now);
        }
        false
    }

    fn store(&self, credential: &Credential) {
        self.entries.insert(
            credential.username.as_str().to_string(),
            CacheEntry {
                password: credential.password.as_str().to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

#[async_trait::async_trait]
impl Verifier for CachingVerifier {
    async fn verify(&self, credential: &Credential) -> Result<bool> {
        if self.lookup(credential) {
            self.metrics.metrics.auth_cache_hits.inc();
            trace!(username = %credential.username, "auth cache hit");
            return Ok(true);
        }
        self.metrics.metrics.auth_cache_misses.inc();

        let ok = self.inner.verify(credential).await?;
        if ok {
            self.store(credential);
            trace!(username = %credential.username, ttl_secs = self.ttl.as_secs(), "auth cache set");
        }
        Ok(ok)
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Accepts `alice:secret`; counts calls.
    #[derive(Default)]
    struct CountingVerifier {
        calls: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl Verifier for CountingVerifier {
        async fn verify(&self, credential: &Credential) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("backend down");
            }
            Ok(credential.username.as_str() == "alice" && credential.password.as_str() == "secret")
        }
    }

    fn caching(ttl: Duration) -> (CachingVerifier, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let inner = CountingVerifier::default();
        let calls = Arc::clone(&inner.calls);
        let fail = Arc::clone(&inner.fail);
        let verifier = CachingVerifier::new(Box::new(inner), ttl, MetricsRegistry::new());
        (verifier, calls, fail)
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let (verifier, calls, _) = caching(Duration::from_secs(60));
        let cred = Credential::new("alice", "secret");

        assert!(verifier.verify(&cred).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(verifier.verify(&cred).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(verifier.metrics.metrics.auth_cache_hits.get(), 1);
    }

    #[tokio::test]
    async fn test_different_password_calls_backend() {
        let (verifier, calls, _) = caching(Duration::from_secs(60));

        assert!(verifier.verify(&Credential::new("alice", "secret")).await.unwrap());
        assert!(!verifier.verify(&Credential::new("alice", "guess")).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // A failed attempt must not evict the good entry.
        assert!(verifier.verify(&Credential::new("alice", "secret")).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_denials_not_cached() {
        let (verifier, calls, _) = caching(Duration::from_secs(60));
        let cred = Credential::new("mallory", "x");

        assert!(!verifier.verify(&cred).await.unwrap());
        assert!(!verifier.verify(&cred).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_propagate_and_not_cached() {
        let (verifier, calls, fail) = caching(Duration::from_secs(60));
        let cred = Credential::new("alice", "secret");

        fail.store(true, Ordering::SeqCst);
        assert!(verifier.verify(&cred).await.is_err());

        fail.store(false, Ordering::SeqCst);
        assert!(verifier.verify(&cred).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_calls_backend_again() {
        let (verifier, calls, _) = caching(Duration::from_secs(60));
        let cred = Credential::new("alice", "secret");

        assert!(verifier.verify(&cred).await.unwrap());
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(verifier.verify(&cred).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(verifier.verify(&cred).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_after_expiry_is_not_masked() {
        let (verifier, _, fail) = caching(Duration::from_secs(10));
        let cred = Credential::new("alice", "secret");

        assert!(verifier.verify(&cred).await.unwrap());
        tokio::time::advance(Duration::from_secs(11)).await;
        fail.store(true, Ordering::SeqCst);
        assert!(verifier.verify(&cred).await.is_err());
    }

    #[test]
    fn test_zero_ttl_uses_default() {
        let (verifier, _, _) = caching(Duration::ZERO);
        assert_eq!(verifier.ttl, DEFAULT_TTL);
    }
}
