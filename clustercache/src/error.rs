//! Error types for the cluster cache client

use std::sync::Arc;
use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors raised by a [`ClusterStore`](crate::store::ClusterStore) primitive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Command or socket timed out
    #[error("{0}")]
    Timeout(String),

    /// Connection refused, dropped or otherwise unusable
    #[error("{0}")]
    Connection(String),

    /// The server answered with an error reply
    #[error("{0}")]
    Response(String),

    /// INCRBY rejected the stored value (not a native integer, or out of range)
    #[error("value is not an integer or out of range")]
    IncrNotInteger,

    /// Reply had an unexpected shape
    #[error("{0}")]
    Protocol(String),

    /// Anything else (client misconfiguration, cluster state, ...)
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Name of the failure kind, as shown in [`CacheError::ConnectionInterrupted`]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "TimeoutError",
            Self::Connection(_) => "ConnectionError",
            Self::Response(_) | Self::IncrNotInteger => "ResponseError",
            Self::Protocol(_) => "ProtocolError",
            Self::Other(_) => "StoreError",
        }
    }

    /// Whether this is one of the transport failures that get translated
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::Response(_) | Self::IncrNotInteger
        )
    }
}

/// Compression/decompression failure reported by a [`Compressor`](crate::compression::Compressor)
#[derive(Error, Debug)]
#[error("{algorithm} {operation} failed: {source}")]
pub struct CompressionError {
    pub algorithm: &'static str,
    pub operation: &'static str,
    #[source]
    pub source: std::io::Error,
}

impl CompressionError {
    pub(crate) fn compress(algorithm: &'static str, source: std::io::Error) -> Self {
        Self {
            algorithm,
            operation: "compression",
            source,
        }
    }

    pub(crate) fn decompress(algorithm: &'static str, source: std::io::Error) -> Self {
        Self {
            algorithm,
            operation: "decompression",
            source,
        }
    }
}

/// Value encoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("MessagePack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    /// The stored value is an integer but the requested type cannot hold it
    #[error("Stored integer {value} does not fit the requested type: {reason}")]
    Integer { value: String, reason: String },

    #[error("Serialized value has trailing bytes: read {consumed} of {len}")]
    TrailingBytes { consumed: usize, len: usize },
}

/// Cache client error types
#[derive(Error, Debug)]
pub enum CacheError {
    /// Transport failure while talking to the cluster
    #[error("Redis Cluster {kind}: {source}", kind = .source.kind_name())]
    ConnectionInterrupted {
        /// Description of the connection that failed
        connection: Arc<str>,
        source: StoreError,
    },

    /// Increment or version change on a key that does not exist
    #[error("Key '{0}' not found")]
    KeyNotFound(String),

    /// Invalid client configuration
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    /// Value could not be encoded or decoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Version arithmetic left the valid range (versions start at 1)
    #[error("Invalid version: {version} + {delta}")]
    InvalidVersion { version: u64, delta: i64 },

    /// Application-level increment overflowed `i64`
    #[error("Increment would overflow for key '{0}'")]
    Overflow(String),

    /// Lock released by a holder that no longer owns it
    #[error("Cannot release a lock that is no longer owned: {0}")]
    LockNotOwned(String),

    /// Store error outside the translated transport set
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl CacheError {
    /// Whether the error is a translated transport failure
    pub fn is_connection_interrupted(&self) -> bool {
        matches!(self, Self::ConnectionInterrupted { .. })
    }
}

/// Maps store errors onto [`CacheError`], keeping the failed connection
///
/// Only timeouts, connection failures and error replies are translated into
/// [`CacheError::ConnectionInterrupted`]; every other kind passes through as
/// [`CacheError::Store`].
#[derive(Debug, Clone)]
pub struct ErrorTranslator {
    connection: Arc<str>,
}

impl ErrorTranslator {
    pub fn new(connection: impl Into<Arc<str>>) -> Self {
        Self {
            connection: connection.into(),
        }
    }

    /// Connection description attached to translated errors
    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn translate(&self, err: StoreError) -> CacheError {
        if err.is_transport() {
            CacheError::ConnectionInterrupted {
                connection: Arc::clone(&self.connection),
                source: err,
            }
        } else {
            CacheError::Store(err)
        }
    }
}
