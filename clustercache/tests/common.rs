//! Common test utilities

use clustercache::{CacheClient, CacheConfig, MemoryStore};
use std::sync::Arc;

/// Route client logs to the test output (`RUST_LOG=debug cargo test`)
#[allow(dead_code)] // Used by other test modules
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Setup a test client over an in-memory store with prefix `app`
#[allow(dead_code)] // Used by other test modules
pub fn setup_test_client() -> (CacheClient, MemoryStore) {
    setup_client_with(CacheConfig::default().with_key_prefix("app"))
}

/// Setup a test client over an in-memory store with a custom configuration
#[allow(dead_code)] // Used by other test modules
pub fn setup_client_with(config: CacheConfig) -> (CacheClient, MemoryStore) {
    init_tracing();
    let store = MemoryStore::new();
    let client = CacheClient::with_store(config, Arc::new(store.clone())).unwrap();
    (client, store)
}

/// Setup a client against a running cluster (`CLUSTERCACHE_NODES`)
#[allow(dead_code)] // Used by e2e test modules
pub async fn setup_e2e_client(prefix: &str) -> CacheClient {
    init_tracing();
    let nodes = std::env::var("CLUSTERCACHE_NODES")
        .unwrap_or_else(|_| "redis://127.0.0.1:7000".to_string());
    let config = CacheConfig::new(nodes)
        .with_key_prefix(prefix)
        .with_socket_timeout(std::time::Duration::from_secs(5));
    CacheClient::connect(config)
        .await
        .expect("Failed to connect to the cluster")
}
