//! # clustercache
//!
//! Cache client for Redis Cluster with versioned keys and compressed values.
//!
//! ## Features
//!
//! - **Versioned keys**: physical keys are `prefix:version:key`; bumping the
//!   shared default version invalidates a whole key family at once
//! - **Value codec**: integers stored as decimal text (native `INCRBY`),
//!   everything else as MessagePack or JSON with optional zlib/LZ4/Zstd
//! - **Cluster aware**: multi-key commands split per hash slot, key scans and
//!   flushes fanned out to every master
//! - **One error for transport failures**: timeouts, dropped connections and
//!   error replies surface as [`CacheError::ConnectionInterrupted`]
//! - **Distributed locks** with owner tokens
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clustercache::{CacheClient, CacheConfig, Timeout};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::new("redis://10.0.0.1:7000,redis://10.0.0.2:7000")
//!         .with_key_prefix("app");
//!     let cache = CacheClient::connect(config).await?;
//!
//!     cache.set("user:1", &"John Doe", Timeout::Default, None).await?;
//!     let value: Option<String> = cache.get("user:1", None).await?;
//!     println!("Value: {:?}", value);
//!
//!     cache.set("hits", &0, Timeout::Never, None).await?;
//!     cache.incr("hits", 1, None).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod compression;
pub mod config;
pub mod error;
pub mod key;
pub mod lock;
pub mod store;
pub mod types;

pub use client::CacheClient;
pub use codec::{EncodedValue, SerializerFormat, ValueCodec};
pub use compression::CompressionAlgorithm;
pub use config::CacheConfig;
pub use error::{CacheError, CodecError, ErrorTranslator, Result, StoreError};
pub use key::{CacheKey, DefaultKeyFunction, DefaultVersion, KeyCodec, KeyFunction, KeyRef};
pub use lock::{DistributedLock, LockOptions};
pub use store::{ClusterStore, MemoryStore, RedisClusterStore};
pub use types::{SetOptions, Timeout};
