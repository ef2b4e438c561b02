use crate::models::CatalogEntry;
use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use time::{Duration, OffsetDateTime};

/// Authentication statistics
#[derive(Debug, Clone)]
pub struct AuthStats {
    inner: Arc<AuthStatsInner>,
}

#[derive(Debug, Default)]
struct AuthStatsInner {
    hits: AtomicU64,
    misses: AtomicU64,
    authentications: AtomicU64,
    failures: AtomicU64,
    invalidations: AtomicU64,
}

impl AuthStats {
    /// Create new authentication statistics
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(AuthStatsInner::default()),
        }
    }

    /// Get the number of token requests served from the cache
    pub fn hits(&self) -> u64 {
        self.inner.hits.load(Ordering::Relaxed)
    }

    /// Get the number of token requests that found no valid cached token
    pub fn misses(&self) -> u64 {
        self.inner.misses.load(Ordering::Relaxed)
    }

    /// Get the number of authentication calls sent to the identity service
    pub fn authentications(&self) -> u64 {
        self.inner.authentications.load(Ordering::Relaxed)
    }

    /// Get the number of failed authentication calls
    pub fn failures(&self) -> u64 {
        self.inner.failures.load(Ordering::Relaxed)
    }

    /// Get the number of explicit invalidations
    pub fn invalidations(&self) -> u64 {
        self.inner.invalidations.load(Ordering::Relaxed)
    }

    /// Get the cache hit rate as a percentage (0.0-100.0)
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    /// Reset all statistics to zero
    pub fn reset(&self) {
        self.inner.hits.store(0, Ordering::Relaxed);
        self.inner.misses.store(0, Ordering::Relaxed);
        self.inner.authentications.store(0, Ordering::Relaxed);
        self.inner.failures.store(0, Ordering::Relaxed);
        self.inner.invalidations.store(0, Ordering::Relaxed);
    }

    pub(crate) fn record_hit(&self) {
        let _ = self.inner.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        let _ = self.inner.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_authentication(&self) {
        let _ = self.inner.authentications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        let _ = self.inner.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidation(&self) {
        let _ = self.inner.invalidations.fetch_add(1, Ordering::Relaxed);
    }
}

/// A session token with its resolved scope
#[derive(Debug, Clone)]
pub struct CachedToken {
    /// Opaque token value
    pub token: SecretString,
    /// Project the token is scoped to
    pub project_id: String,
    /// Instant after which the token must not be used
    pub expires_at: OffsetDateTime,
    /// Service catalog returned with the token
    pub catalog: Vec<CatalogEntry>,
}

impl CachedToken {
    /// An empty token is never valid, whatever its expiry
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        !self.token.expose_secret().is_empty() && now < self.expires_at
    }

    /// Whether the token is invalid now or becomes so within `threshold`
    pub fn expires_within(&self, threshold: Duration) -> bool {
        !self.is_valid_at(OffsetDateTime::now_utc() + threshold)
    }
}

/// Single-slot token cache
///
/// Reads take a shared lock; `set` and `invalidate` take it exclusively.
/// Concurrent writers are not coordinated: the last one wins.
#[derive(Debug, Default)]
pub struct TokenCache {
    slot: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached token, if it is still valid
    pub fn get(&self) -> Option<CachedToken> {
        let now = OffsetDateTime::now_utc();
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|t| t.is_valid_at(now))
            .cloned()
    }

    /// Replace the cached token
    pub fn set(&self, token: CachedToken) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    /// Clear the cache; returns whether a token was present
    pub fn invalidate(&self) -> bool {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    /// Expiry of the cached token, valid or not
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| t.expires_at)
    }

    #[cfg(test)]
    pub(crate) fn force_expiry(&self, at: OffsetDateTime) {
        if let Some(token) = self
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            token.expires_at = at;
        }
    }
}
