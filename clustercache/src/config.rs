//! Client configuration

use crate::codec::SerializerFormat;
use crate::compression::CompressionAlgorithm;
use crate::error::{CacheError, Result};
use crate::key::KeyFunction;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default Redis port, used when a server address has none
pub const DEFAULT_PORT: u16 = 6379;

/// Cache client configuration
///
/// Can be built with the `with_*` methods or deserialized from the host
/// application's own configuration. `servers` accepts a list or a single
/// comma-separated string.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seed nodes (`redis://host:port`, `host:port` or `host`)
    #[serde(deserialize_with = "servers_from_list_or_string")]
    pub servers: Vec<String>,
    /// Response timeout in seconds
    pub socket_timeout: Option<f64>,
    /// Connect timeout in seconds
    pub socket_connect_timeout: Option<f64>,
    /// Namespace prepended to every key
    pub key_prefix: String,
    /// Initial default key version
    pub default_version: u64,
    /// Expiry applied by `Timeout::Default`, in seconds (`None` never expires)
    pub default_timeout: Option<u64>,
    pub serializer: SerializerFormat,
    pub compressor: CompressionAlgorithm,
    /// Minimum serialized size before compression is attempted (0 disables)
    pub compress_min_len: usize,
    pub zstd_level: i32,
    /// Custom key layout; `prefix:version:key` when unset
    #[serde(skip)]
    pub key_function: Option<Arc<dyn KeyFunction>>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            socket_timeout: None,
            socket_connect_timeout: None,
            key_prefix: String::new(),
            default_version: 1,
            default_timeout: Some(300),
            serializer: SerializerFormat::default(),
            compressor: CompressionAlgorithm::default(),
            compress_min_len: 0,
            zstd_level: 3,
            key_function: None,
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("servers", &self.servers)
            .field("socket_timeout", &self.socket_timeout)
            .field("socket_connect_timeout", &self.socket_connect_timeout)
            .field("key_prefix", &self.key_prefix)
            .field("default_version", &self.default_version)
            .field("default_timeout", &self.default_timeout)
            .field("serializer", &self.serializer)
            .field("compressor", &self.compressor)
            .field("compress_min_len", &self.compress_min_len)
            .field("zstd_level", &self.zstd_level)
            .field("key_function", &self.key_function.is_some())
            .finish()
    }
}

impl CacheConfig {
    /// Create a configuration for the given seed servers
    ///
    /// `servers` may be a single comma-separated string.
    pub fn new(servers: impl Into<String>) -> Self {
        Self {
            servers: split_servers(&servers.into()),
            ..Default::default()
        }
    }

    /// Set the seed servers
    pub fn with_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the key namespace
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the initial default version
    pub fn with_default_version(mut self, version: u64) -> Self {
        self.default_version = version;
        self
    }

    /// Set the default expiry (`None` never expires)
    pub fn with_default_timeout(mut self, timeout: Option<u64>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the response timeout
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout.as_secs_f64());
        self
    }

    /// Set the connect timeout
    pub fn with_socket_connect_timeout(mut self, timeout: Duration) -> Self {
        self.socket_connect_timeout = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_serializer(mut self, serializer: SerializerFormat) -> Self {
        self.serializer = serializer;
        self
    }

    /// Set the compression algorithm and the size threshold that enables it
    pub fn with_compression(mut self, compressor: CompressionAlgorithm, min_len: usize) -> Self {
        self.compressor = compressor;
        self.compress_min_len = min_len;
        self
    }

    pub fn with_zstd_level(mut self, level: i32) -> Self {
        self.zstd_level = level;
        self
    }

    /// Use a custom key layout
    pub fn with_key_function(mut self, function: Arc<dyn KeyFunction>) -> Self {
        self.key_function = Some(function);
        self
    }

    /// Response timeout as a [`Duration`]
    pub fn response_timeout(&self) -> Option<Duration> {
        self.socket_timeout.map(Duration::from_secs_f64)
    }

    /// Connect timeout as a [`Duration`]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.socket_connect_timeout.map(Duration::from_secs_f64)
    }

    /// Normalized seed URLs
    ///
    /// Addresses without a scheme get `redis://`, addresses without a port get
    /// [`DEFAULT_PORT`].
    pub fn server_urls(&self) -> Result<Vec<String>> {
        let urls = self
            .servers
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(normalize_server)
            .collect::<Result<Vec<_>>>()?;

        if urls.is_empty() {
            return Err(CacheError::ImproperlyConfigured(
                "at least one server address is required".to_string(),
            ));
        }
        Ok(urls)
    }

    /// Check the configuration without connecting
    pub fn validate(&self) -> Result<()> {
        self.server_urls()?;
        self.validate_options()
    }

    /// Check everything except the server list
    pub(crate) fn validate_options(&self) -> Result<()> {
        if self.default_version == 0 {
            return Err(CacheError::ImproperlyConfigured(
                "default_version must be at least 1".to_string(),
            ));
        }

        for (name, value) in [
            ("socket_timeout", self.socket_timeout),
            ("socket_connect_timeout", self.socket_connect_timeout),
        ] {
            if let Some(secs) = value {
                if !secs.is_finite() || secs <= 0.0 {
                    return Err(CacheError::ImproperlyConfigured(format!(
                        "{name} must be a positive number of seconds, got {secs}"
                    )));
                }
            }
        }

        if self.compressor == CompressionAlgorithm::Zstd && !(1..=22).contains(&self.zstd_level) {
            return Err(CacheError::ImproperlyConfigured(format!(
                "zstd_level must be between 1 and 22, got {}",
                self.zstd_level
            )));
        }

        Ok(())
    }
}

fn split_servers(servers: &str) -> Vec<String> {
    servers
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn normalize_server(server: &str) -> Result<String> {
    let with_scheme = if server.contains("://") {
        server.to_string()
    } else {
        format!("redis://{server}")
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| {
        CacheError::ImproperlyConfigured(format!("invalid server address '{server}': {e}"))
    })?;

    if !matches!(url.scheme(), "redis" | "rediss") {
        return Err(CacheError::ImproperlyConfigured(format!(
            "unsupported scheme '{}' in server address '{server}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(CacheError::ImproperlyConfigured(format!(
            "server address '{server}' has no host"
        )));
    }
    if url.port().is_none() {
        url.set_port(Some(DEFAULT_PORT)).map_err(|_| {
            CacheError::ImproperlyConfigured(format!("cannot set port on '{server}'"))
        })?;
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn servers_from_list_or_string<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Servers {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Servers::deserialize(deserializer)? {
        Servers::One(servers) => split_servers(&servers),
        Servers::Many(servers) => servers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.default_version, 1);
        assert_eq!(config.default_timeout, Some(300));
        assert_eq!(config.serializer, SerializerFormat::Msgpack);
        assert_eq!(config.compressor, CompressionAlgorithm::Zlib);
        assert_eq!(config.compress_min_len, 0);
        assert!(config.key_function.is_none());
    }

    #[test]
    fn test_comma_separated_servers() {
        let config = CacheConfig::new("10.0.0.1:7000, 10.0.0.2 ,redis://10.0.0.3:7002");
        assert_eq!(
            config.server_urls().unwrap(),
            vec![
                "redis://10.0.0.1:7000",
                "redis://10.0.0.2:6379",
                "redis://10.0.0.3:7002",
            ]
        );
    }

    #[test]
    fn test_no_servers_is_improperly_configured() {
        let err = CacheConfig::default().validate().unwrap_err();
        assert!(matches!(err, CacheError::ImproperlyConfigured(_)));

        let err = CacheConfig::new(" , ").server_urls().unwrap_err();
        assert!(matches!(err, CacheError::ImproperlyConfigured(_)));
    }

    #[test]
    fn test_invalid_server_addresses() {
        for bad in ["http://host:7000", "redis://:7000", "redis://host:notaport"] {
            let config = CacheConfig::default().with_servers([bad]);
            assert!(
                matches!(config.server_urls(), Err(CacheError::ImproperlyConfigured(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_option_validation() {
        let config = CacheConfig::new("localhost").with_default_version(0);
        assert!(config.validate().is_err());

        let mut config = CacheConfig::new("localhost");
        config.socket_timeout = Some(-1.0);
        assert!(config.validate().is_err());

        let config = CacheConfig::new("localhost")
            .with_compression(CompressionAlgorithm::Zstd, 64)
            .with_zstd_level(40);
        assert!(config.validate().is_err());

        let config = CacheConfig::new("localhost")
            .with_socket_timeout(Duration::from_millis(250))
            .with_compression(CompressionAlgorithm::Zstd, 64);
        assert!(config.validate().is_ok());
        assert_eq!(config.response_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_deserialize_from_json() {
        let config: CacheConfig = serde_json::from_value(serde_json::json!({
            "servers": "node-a:7000,node-b:7001",
            "key_prefix": "app",
            "default_timeout": null,
            "compressor": "lz4",
            "compress_min_len": 256
        }))
        .unwrap();

        assert_eq!(config.servers, vec!["node-a:7000", "node-b:7001"]);
        assert_eq!(config.key_prefix, "app");
        assert_eq!(config.default_timeout, None);
        assert_eq!(config.compressor, CompressionAlgorithm::Lz4);
        assert_eq!(config.default_version, 1);

        let config: CacheConfig =
            serde_json::from_value(serde_json::json!({ "servers": ["a:1", "b:2"] })).unwrap();
        assert_eq!(config.servers, vec!["a:1", "b:2"]);
    }
}
