//! Distributed lock on a cache key
//!
//! The lock value is a random token, so only the holder that acquired the lock
//! can release it. A lock with a `timeout` expires on its own if the holder
//! goes away.

use crate::error::{CacheError, ErrorTranslator, Result};
use crate::key::CacheKey;
use crate::store::ClusterStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lock acquisition options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Expire the lock after this long (`None` holds it until released)
    pub timeout: Option<Duration>,
    /// Delay between acquisition attempts
    pub sleep: Duration,
    /// Wait for the lock instead of failing immediately
    pub blocking: bool,
    /// Give up waiting after this long (`None` waits forever)
    pub blocking_timeout: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            sleep: Duration::from_millis(100),
            blocking: true,
            blocking_timeout: None,
        }
    }
}

impl LockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    pub fn blocking_timeout(mut self, timeout: Duration) -> Self {
        self.blocking_timeout = Some(timeout);
        self
    }
}

/// A lock bound to one physical key
pub struct DistributedLock {
    store: Arc<dyn ClusterStore>,
    errors: ErrorTranslator,
    key: CacheKey,
    token: String,
    options: LockOptions,
}

impl DistributedLock {
    pub(crate) fn new(
        store: Arc<dyn ClusterStore>,
        errors: ErrorTranslator,
        key: CacheKey,
        options: LockOptions,
    ) -> Self {
        Self {
            store,
            errors,
            key,
            token: Uuid::new_v4().to_string(),
            options,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Token stored as the lock value while held
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Acquire the lock
    ///
    /// Returns `Ok(false)` when the lock is held elsewhere and either
    /// `blocking` is off or `blocking_timeout` ran out.
    pub async fn acquire(&self) -> Result<bool> {
        let deadline = self
            .options
            .blocking_timeout
            .map(|timeout| Instant::now() + timeout);

        loop {
            let acquired = self
                .store
                .try_lock(self.key.as_str(), &self.token, self.options.timeout)
                .await
                .map_err(|e| self.errors.translate(e))?;

            if acquired {
                debug!("Lock acquired: {}", self.key);
                return Ok(true);
            }
            if !self.options.blocking {
                return Ok(false);
            }
            if let Some(deadline) = deadline {
                if Instant::now() + self.options.sleep > deadline {
                    debug!("Gave up waiting for lock: {}", self.key);
                    return Ok(false);
                }
            }

            tokio::time::sleep(self.options.sleep).await;
        }
    }

    /// Release the lock
    ///
    /// Fails with [`CacheError::LockNotOwned`] if the lock expired or was
    /// taken over since it was acquired.
    pub async fn release(&self) -> Result<()> {
        let released = self
            .store
            .unlock(self.key.as_str(), &self.token)
            .await
            .map_err(|e| self.errors.translate(e))?;

        if !released {
            warn!("Released a lock that is no longer owned: {}", self.key);
            return Err(CacheError::LockNotOwned(self.key.to_string()));
        }
        debug!("Lock released: {}", self.key);
        Ok(())
    }

    /// Whether anyone currently holds the lock
    pub async fn locked(&self) -> Result<bool> {
        self.store
            .exists(self.key.as_str())
            .await
            .map_err(|e| self.errors.translate(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{DefaultKeyFunction, DefaultVersion, KeyCodec};
    use crate::store::MemoryStore;

    fn lock(store: &MemoryStore, options: LockOptions) -> DistributedLock {
        let keys = KeyCodec::new("app", DefaultVersion::default(), Arc::new(DefaultKeyFunction));
        DistributedLock::new(
            Arc::new(store.clone()),
            ErrorTranslator::new("memory"),
            keys.build("job", None),
            options,
        )
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store = MemoryStore::new();
        let lock = lock(&store, LockOptions::new());

        assert!(!lock.locked().await.unwrap());
        assert!(lock.acquire().await.unwrap());
        assert!(lock.locked().await.unwrap());
        assert_eq!(store.raw("app:1:job"), Some(lock.token().as_bytes().to_vec()));

        lock.release().await.unwrap();
        assert!(!lock.locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_non_blocking_contention() {
        let store = MemoryStore::new();
        let first = lock(&store, LockOptions::new());
        let second = lock(&store, LockOptions::new().non_blocking());

        assert!(first.acquire().await.unwrap());
        assert!(!second.acquire().await.unwrap());
        assert_ne!(first.token(), second.token());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_timeout() {
        let store = MemoryStore::new();
        let first = lock(&store, LockOptions::new());
        let second = lock(
            &store,
            LockOptions::new()
                .sleep(Duration::from_millis(50))
                .blocking_timeout(Duration::from_millis(300)),
        );

        assert!(first.acquire().await.unwrap());
        let started = Instant::now();
        assert!(!second.acquire().await.unwrap());
        assert!(started.elapsed() <= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_gets_expired_lock() {
        let store = MemoryStore::new();
        let first = lock(&store, LockOptions::new().timeout(Duration::from_secs(1)));
        let second = lock(
            &store,
            LockOptions::new().blocking_timeout(Duration::from_secs(5)),
        );

        assert!(first.acquire().await.unwrap());
        assert!(second.acquire().await.unwrap());

        let err = first.release().await.unwrap_err();
        assert!(matches!(err, CacheError::LockNotOwned(_)));
        second.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_failure_is_translated() {
        let store = MemoryStore::new();
        let lock = lock(&store, LockOptions::new());
        store.fail_next(crate::error::StoreError::Connection("reset".into()));

        let err = lock.acquire().await.unwrap_err();
        assert!(err.is_connection_interrupted());
    }
}
