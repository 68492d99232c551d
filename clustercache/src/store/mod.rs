//! Store primitives the cache client is built on
//!
//! [`ClusterStore`] is the boundary to the cluster-aware connection. Routing,
//! pooling and the wire protocol all live behind it.

pub mod cluster;
pub mod hash_slot;
pub mod memory;

pub use cluster::RedisClusterStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// Result type alias for store primitives
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Lazy stream of physical keys produced by a cursor scan
pub type KeyStream = BoxStream<'static, StoreResult<String>>;

/// `TTL` reply for a missing key
pub const TTL_MISSING: i64 = -2;

/// `TTL` reply for a key without expiry
pub const TTL_PERSISTENT: i64 = -1;

/// Write guard for [`ClusterStore::set`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetCondition {
    /// Only write if the key does not exist
    pub nx: bool,
    /// Only write if the key already exists
    pub xx: bool,
}

/// One write in a [`ClusterStore::set_batch`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSet {
    pub key: String,
    pub value: Vec<u8>,
    pub expire_secs: Option<u64>,
}

/// Cluster-aware key-value connection
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Human-readable description of the connection, attached to errors
    fn describe(&self) -> String;

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Values in the same order as `keys`
    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>>;

    /// Returns `false` when the write was skipped by `condition`
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        condition: SetCondition,
        expire_secs: Option<u64>,
    ) -> StoreResult<bool>;

    /// Batched unconditional writes. Not atomic across keys.
    async fn set_batch(&self, entries: Vec<BatchSet>) -> StoreResult<()>;

    /// Number of keys removed
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Atomic increment; [`StoreError::IncrNotInteger`] when the stored value
    /// is not a native integer
    async fn incr(&self, key: &str, amount: i64) -> StoreResult<i64>;

    /// Remaining seconds, [`TTL_PERSISTENT`] or [`TTL_MISSING`]
    async fn ttl(&self, key: &str) -> StoreResult<i64>;

    async fn persist(&self, key: &str) -> StoreResult<bool>;

    async fn expire(&self, key: &str, seconds: i64) -> StoreResult<bool>;

    /// Cursor scan over every node; `count` is a per-call batch hint
    fn scan(&self, pattern: &str, count: Option<usize>) -> KeyStream;

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Remove every key on every node
    async fn flush(&self) -> StoreResult<()>;

    /// Set `key` to `token` if absent, expiring after `ttl`
    async fn try_lock(&self, key: &str, token: &str, ttl: Option<Duration>) -> StoreResult<bool>;

    /// Delete `key` only if it still holds `token`
    async fn unlock(&self, key: &str, token: &str) -> StoreResult<bool>;
}
