//! Cache client implementation

use crate::codec::{EncodedValue, ValueCodec};
use crate::config::CacheConfig;
use crate::error::{CacheError, CodecError, ErrorTranslator, Result, StoreError};
use crate::key::{CacheKey, DefaultKeyFunction, DefaultVersion, KeyCodec, KeyFunction, KeyRef};
use crate::lock::{DistributedLock, LockOptions};
use crate::store::{
    BatchSet, ClusterStore, RedisClusterStore, SetCondition, TTL_MISSING, TTL_PERSISTENT,
};
use crate::types::{Expiry, SetOptions, Timeout};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct Inner {
    store: Arc<dyn ClusterStore>,
    keys: KeyCodec,
    codec: ValueCodec,
    errors: ErrorTranslator,
    default_timeout: Option<u64>,
}

/// Cache client over a Redis Cluster
///
/// Cheap to clone; clones share the connection and the default version.
///
/// # Example
/// ```no_run
/// use clustercache::{CacheClient, CacheConfig, Timeout};
///
/// # #[tokio::main]
/// # async fn main() -> clustercache::Result<()> {
/// let config = CacheConfig::new("redis://127.0.0.1:7000").with_key_prefix("app");
/// let cache = CacheClient::connect(config).await?;
///
/// cache.set("user:1", &"alice", Timeout::Seconds(60.0), None).await?;
/// let name: Option<String> = cache.get("user:1", None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CacheClient {
    inner: Arc<Inner>,
}

impl CacheClient {
    /// Connect to the cluster described by `config`
    pub async fn connect(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let store = RedisClusterStore::connect(&config).await?;
        Self::with_store(config, Arc::new(store))
    }

    /// Build a client over an existing store
    ///
    /// `config.servers` is ignored.
    pub fn with_store(config: CacheConfig, store: Arc<dyn ClusterStore>) -> Result<Self> {
        config.validate_options()?;

        let function = config
            .key_function
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultKeyFunction) as Arc<dyn KeyFunction>);
        let keys = KeyCodec::new(
            config.key_prefix.clone(),
            DefaultVersion::new(config.default_version),
            function,
        );
        let codec = ValueCodec::new(
            config.serializer,
            config.compressor.compressor(config.zstd_level),
            config.compress_min_len,
        );
        let errors = ErrorTranslator::new(store.describe());

        info!(
            "Cache client ready: connection={}, prefix={:?}, version={}, serializer={:?}, compressor={}",
            errors.connection(),
            config.key_prefix,
            config.default_version,
            config.serializer,
            config.compressor
        );

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                keys,
                codec,
                errors,
                default_timeout: config.default_timeout,
            }),
        })
    }

    /// Shared default version; bump it to invalidate every unversioned key
    pub fn default_version(&self) -> &DefaultVersion {
        self.inner.keys.default_version()
    }

    pub fn key_codec(&self) -> &KeyCodec {
        &self.inner.keys
    }

    pub fn value_codec(&self) -> &ValueCodec {
        &self.inner.codec
    }

    /// Description of the underlying connection
    pub fn connection(&self) -> &str {
        self.inner.errors.connection()
    }

    /// Build the physical key for `key`
    pub fn make_key<'a>(&self, key: impl Into<KeyRef<'a>>, version: Option<u64>) -> CacheKey {
        self.inner.keys.build(key, version)
    }

    fn translate(&self, err: StoreError) -> CacheError {
        self.inner.errors.translate(err)
    }

    /// Store `value` only if `key` does not exist yet
    ///
    /// Returns `false` if the key already exists.
    pub async fn add<'a, V>(
        &self,
        key: impl Into<KeyRef<'a>>,
        value: &V,
        timeout: impl Into<Timeout>,
        version: Option<u64>,
    ) -> Result<bool>
    where
        V: Serialize + ?Sized,
    {
        let options = SetOptions {
            timeout: timeout.into(),
            version,
            nx: true,
            xx: false,
        };
        self.set_with(key, value, options).await
    }

    /// Store `value`
    ///
    /// A zero or negative timeout deletes the key instead and returns `false`.
    pub async fn set<'a, V>(
        &self,
        key: impl Into<KeyRef<'a>>,
        value: &V,
        timeout: impl Into<Timeout>,
        version: Option<u64>,
    ) -> Result<bool>
    where
        V: Serialize + ?Sized,
    {
        let options = SetOptions {
            timeout: timeout.into(),
            version,
            ..Default::default()
        };
        self.set_with(key, value, options).await
    }

    /// Store `value` with explicit `NX`/`XX` options
    ///
    /// Returns `false` when the write was skipped by `NX`/`XX`, or when a
    /// non-positive timeout turned it into a delete.
    pub async fn set_with<'a, V>(
        &self,
        key: impl Into<KeyRef<'a>>,
        value: &V,
        options: SetOptions,
    ) -> Result<bool>
    where
        V: Serialize + ?Sized,
    {
        let key = self.inner.keys.build(key, options.version);

        let expire_secs = match options.timeout.resolve(self.inner.default_timeout, options.nx) {
            Expiry::Delete => {
                debug!("Non-positive timeout, deleting {}", key);
                self.inner
                    .store
                    .delete(&[key.into_string()])
                    .await
                    .map_err(|e| self.translate(e))?;
                return Ok(false);
            }
            Expiry::Never => None,
            Expiry::After(secs) => Some(secs),
        };

        let value = self.inner.codec.encode(value)?.into_bytes();
        let condition = SetCondition {
            nx: options.nx,
            xx: options.xx,
        };

        self.inner
            .store
            .set(key.as_str(), value, condition, expire_secs)
            .await
            .map_err(|e| self.translate(e))
    }

    /// Store several values in one batched write
    ///
    /// Not atomic: entries are grouped by hash slot and each group is sent
    /// separately. A zero or negative timeout deletes every key instead.
    pub async fn set_batch<K, V, I>(
        &self,
        entries: I,
        timeout: impl Into<Timeout>,
        version: Option<u64>,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Serialize,
    {
        let timeout: Timeout = timeout.into();
        let expiry = timeout.resolve(self.inner.default_timeout, false);

        if expiry == Expiry::Delete {
            let keys: Vec<String> = entries
                .into_iter()
                .map(|(key, _)| self.inner.keys.build(key.as_ref(), version).into_string())
                .collect();
            if !keys.is_empty() {
                self.inner
                    .store
                    .delete(&keys)
                    .await
                    .map_err(|e| self.translate(e))?;
            }
            return Ok(());
        }

        let expire_secs = match expiry {
            Expiry::After(secs) => Some(secs),
            _ => None,
        };

        let batch = entries
            .into_iter()
            .map(|(key, value)| -> Result<BatchSet> {
                Ok(BatchSet {
                    key: self.inner.keys.build(key.as_ref(), version).into_string(),
                    value: self.inner.codec.encode(&value)?.into_bytes(),
                    expire_secs,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if batch.is_empty() {
            return Ok(());
        }

        self.inner
            .store
            .set_batch(batch)
            .await
            .map_err(|e| self.translate(e))
    }

    /// Fetch and decode a value
    pub async fn get<'a, V>(&self, key: impl Into<KeyRef<'a>>, version: Option<u64>) -> Result<Option<V>>
    where
        V: DeserializeOwned,
    {
        let key = self.inner.keys.build(key, version);
        let bytes = self
            .inner
            .store
            .get(key.as_str())
            .await
            .map_err(|e| self.translate(e))?;

        match bytes {
            Some(bytes) => Ok(Some(self.inner.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch a value, falling back to `default` when absent
    pub async fn get_or<'a, V>(
        &self,
        key: impl Into<KeyRef<'a>>,
        default: V,
        version: Option<u64>,
    ) -> Result<V>
    where
        V: DeserializeOwned,
    {
        Ok(self.get(key, version).await?.unwrap_or(default))
    }

    /// Fetch several values with one multi-get
    ///
    /// Returns `(key, value)` pairs in input order. Missing keys are omitted
    /// and duplicates are fetched once.
    pub async fn get_many<K, V>(&self, keys: &[K], version: Option<u64>) -> Result<Vec<(String, V)>>
    where
        K: AsRef<str>,
        V: DeserializeOwned,
    {
        let mut seen = HashSet::new();
        let originals: Vec<&str> = keys
            .iter()
            .map(|key| key.as_ref())
            .filter(|key| seen.insert(*key))
            .collect();

        if originals.is_empty() {
            return Ok(Vec::new());
        }

        let physical: Vec<String> = originals
            .iter()
            .map(|key| self.inner.keys.build(*key, version).into_string())
            .collect();

        let values = self
            .inner
            .store
            .mget(&physical)
            .await
            .map_err(|e| self.translate(e))?;

        let mut found = Vec::with_capacity(values.len());
        for (key, value) in originals.into_iter().zip(values) {
            if let Some(bytes) = value {
                found.push((key.to_string(), self.inner.codec.decode(&bytes)?));
            }
        }
        Ok(found)
    }

    /// Logical keys matching a glob pattern
    pub async fn keys(&self, pattern: &str, version: Option<u64>) -> Result<Vec<String>> {
        let pattern = self.inner.keys.pattern(pattern, version);
        let keys = self
            .inner
            .store
            .keys(&pattern)
            .await
            .map_err(|e| self.translate(e))?;

        Ok(keys.iter().map(|k| self.inner.keys.reverse(k)).collect())
    }

    /// Lazily iterate logical keys matching a glob pattern
    ///
    /// Uses cursor scans; `batch_size` is a per-call hint to the server.
    pub fn iter_keys(
        &self,
        pattern: &str,
        batch_size: Option<usize>,
        version: Option<u64>,
    ) -> BoxStream<'static, Result<String>> {
        let pattern = self.inner.keys.pattern(pattern, version);
        let keys = self.inner.keys.clone();
        let errors = self.inner.errors.clone();

        self.inner
            .store
            .scan(&pattern, batch_size)
            .map(move |item| match item {
                Ok(key) => Ok(keys.reverse(&key)),
                Err(err) => Err(errors.translate(err)),
            })
            .boxed()
    }

    /// Delete one key; returns whether it existed
    pub async fn delete<'a>(&self, key: impl Into<KeyRef<'a>>, version: Option<u64>) -> Result<bool> {
        let key = self.inner.keys.build(key, version);
        let removed = self
            .inner
            .store
            .delete(&[key.into_string()])
            .await
            .map_err(|e| self.translate(e))?;
        Ok(removed > 0)
    }

    /// Delete several keys; returns how many existed
    pub async fn delete_many<K>(&self, keys: &[K], version: Option<u64>) -> Result<u64>
    where
        K: AsRef<str>,
    {
        if keys.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = keys
            .iter()
            .map(|key| self.inner.keys.build(key.as_ref(), version).into_string())
            .collect();

        self.inner
            .store
            .delete(&keys)
            .await
            .map_err(|e| self.translate(e))
    }

    /// Delete every key matching a glob pattern; returns how many were removed
    pub async fn delete_pattern(&self, pattern: &str, version: Option<u64>) -> Result<u64> {
        let pattern = self.inner.keys.pattern(pattern, version);
        let keys: Vec<String> = self
            .inner
            .store
            .scan(&pattern, None)
            .try_collect()
            .await
            .map_err(|e| self.translate(e))?;

        if keys.is_empty() {
            return Ok(0);
        }

        let removed = self
            .inner
            .store
            .delete(&keys)
            .await
            .map_err(|e| self.translate(e))?;
        debug!("Deleted {} keys matching {}", removed, pattern);
        Ok(removed)
    }

    pub async fn has_key<'a>(&self, key: impl Into<KeyRef<'a>>, version: Option<u64>) -> Result<bool> {
        let key = self.inner.keys.build(key, version);
        self.inner
            .store
            .exists(key.as_str())
            .await
            .map_err(|e| self.translate(e))
    }

    /// Remove every key on every node, including keys of other prefixes
    ///
    /// Store errors are returned as [`CacheError::Store`], never as
    /// [`CacheError::ConnectionInterrupted`].
    pub async fn clear(&self) -> Result<()> {
        warn!("Flushing every node of {}", self.connection());
        self.inner.store.flush().await.map_err(CacheError::Store)
    }

    /// Add `delta` to an integer value; the key must exist
    ///
    /// Values not stored as decimal text are read, incremented and written
    /// back with their remaining TTL. That path is not atomic.
    pub async fn incr<'a>(
        &self,
        key: impl Into<KeyRef<'a>>,
        delta: i64,
        version: Option<u64>,
    ) -> Result<i64> {
        let key = self.inner.keys.build(key, version);
        let store = &self.inner.store;

        if !store.exists(key.as_str()).await.map_err(|e| self.translate(e))? {
            return Err(CacheError::KeyNotFound(key.original_key().to_string()));
        }

        match store.incr(key.as_str(), delta).await {
            Ok(value) => Ok(value),
            Err(StoreError::IncrNotInteger) => self.incr_slow(&key, delta).await,
            Err(err) => Err(self.translate(err)),
        }
    }

    async fn incr_slow(&self, key: &CacheKey, delta: i64) -> Result<i64> {
        debug!("INCRBY rejected {}, falling back to read-modify-write", key);
        let store = &self.inner.store;

        let ttl = store.ttl(key.as_str()).await.map_err(|e| self.translate(e))?;
        let expire_secs = carried_expiry(ttl, key)?;
        let bytes = store
            .get(key.as_str())
            .await
            .map_err(|e| self.translate(e))?
            .ok_or_else(|| CacheError::KeyNotFound(key.original_key().to_string()))?;

        let current: i64 = match self.inner.codec.decode(&bytes) {
            Ok(current) => current,
            // integer text beyond the i64 range INCRBY works in
            Err(CodecError::Integer { .. }) => {
                return Err(CacheError::Overflow(key.original_key().to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let value = current
            .checked_add(delta)
            .ok_or_else(|| CacheError::Overflow(key.original_key().to_string()))?;

        store
            .set(
                key.as_str(),
                EncodedValue::Integer(i128::from(value)).into_bytes(),
                SetCondition::default(),
                expire_secs,
            )
            .await
            .map_err(|e| self.translate(e))?;
        Ok(value)
    }

    /// Subtract `delta` from an integer value; the key must exist
    pub async fn decr<'a>(
        &self,
        key: impl Into<KeyRef<'a>>,
        delta: i64,
        version: Option<u64>,
    ) -> Result<i64> {
        let key = self.inner.keys.build(key, version);
        let delta = delta
            .checked_neg()
            .ok_or_else(|| CacheError::Overflow(key.original_key().to_string()))?;
        self.incr(&key, delta, None).await
    }

    /// Move a value to `version + delta`, keeping its TTL
    ///
    /// The old key is deleted. Returns the new version.
    pub async fn incr_version<'a>(
        &self,
        key: impl Into<KeyRef<'a>>,
        delta: i64,
        version: Option<u64>,
    ) -> Result<u64> {
        let old_key = self.inner.keys.build(key, version);
        let store = &self.inner.store;

        let bytes = store
            .get(old_key.as_str())
            .await
            .map_err(|e| self.translate(e))?
            .ok_or_else(|| CacheError::KeyNotFound(old_key.original_key().to_string()))?;

        let current = old_key.version();
        let invalid = || CacheError::InvalidVersion {
            version: current,
            delta,
        };
        let next = current
            .checked_add_signed(delta)
            .filter(|v| *v >= 1)
            .ok_or_else(invalid)?;
        if next == current {
            return Ok(current);
        }

        let ttl = store
            .ttl(old_key.as_str())
            .await
            .map_err(|e| self.translate(e))?;
        // expired since the read
        let expire_secs = carried_expiry(ttl, &old_key)?;
        let new_key = self.inner.keys.build_at(old_key.original_key(), next);

        store
            .set(
                new_key.as_str(),
                bytes,
                SetCondition::default(),
                expire_secs,
            )
            .await
            .map_err(|e| self.translate(e))?;
        store
            .delete(&[old_key.into_string()])
            .await
            .map_err(|e| self.translate(e))?;

        debug!("Moved {} to version {}", new_key.original_key(), next);
        Ok(next)
    }

    /// Move a value to `version - delta`, keeping its TTL
    pub async fn decr_version<'a>(
        &self,
        key: impl Into<KeyRef<'a>>,
        delta: i64,
        version: Option<u64>,
    ) -> Result<u64> {
        let key = self.inner.keys.build(key, version);
        let negated = delta.checked_neg().ok_or(CacheError::InvalidVersion {
            version: key.version(),
            delta,
        })?;
        self.incr_version(&key, negated, None).await
    }

    /// Remaining time to live in seconds
    ///
    /// `Some(0)` for a missing key, `None` for a key that never expires.
    pub async fn ttl<'a>(&self, key: impl Into<KeyRef<'a>>, version: Option<u64>) -> Result<Option<u64>> {
        let key = self.inner.keys.build(key, version);
        let ttl = self
            .inner
            .store
            .ttl(key.as_str())
            .await
            .map_err(|e| self.translate(e))?;

        Ok(match ttl {
            TTL_PERSISTENT => None,
            secs if secs >= 0 => Some(secs as u64),
            _ => Some(0),
        })
    }

    /// Set a key's time to live; returns `false` if the key does not exist
    pub async fn expire<'a>(
        &self,
        key: impl Into<KeyRef<'a>>,
        timeout_secs: i64,
        version: Option<u64>,
    ) -> Result<bool> {
        let key = self.inner.keys.build(key, version);
        self.inner
            .store
            .expire(key.as_str(), timeout_secs)
            .await
            .map_err(|e| self.translate(e))
    }

    /// Remove a key's expiry; returns `false` if the key is missing or already persistent
    pub async fn persist<'a>(&self, key: impl Into<KeyRef<'a>>, version: Option<u64>) -> Result<bool> {
        let key = self.inner.keys.build(key, version);
        self.inner
            .store
            .persist(key.as_str())
            .await
            .map_err(|e| self.translate(e))
    }

    /// Lock bound to the physical key for `key`
    pub fn lock<'a>(
        &self,
        key: impl Into<KeyRef<'a>>,
        options: LockOptions,
        version: Option<u64>,
    ) -> DistributedLock {
        let key = self.inner.keys.build(key, version);
        DistributedLock::new(
            Arc::clone(&self.inner.store),
            self.inner.errors.clone(),
            key,
            options,
        )
    }
}

/// Expiry to carry over from a `TTL` reply when rewriting `key`
///
/// A missing key is [`CacheError::KeyNotFound`]; it must not be written
/// back without an expiry.
fn carried_expiry(ttl: i64, key: &CacheKey) -> Result<Option<u64>> {
    match ttl {
        TTL_MISSING => Err(CacheError::KeyNotFound(key.original_key().to_string())),
        TTL_PERSISTENT => Ok(None),
        secs if secs > 0 => Ok(Some(secs as u64)),
        // about to expire
        _ => Ok(Some(1)),
    }
}
