//! End-to-end tests against a running Redis Cluster
//!
//! Run with `CLUSTERCACHE_NODES=redis://127.0.0.1:7000 cargo test --features e2e`.

#![cfg(feature = "e2e")]

mod common;

#[cfg(test)]
mod tests {
    use super::common::setup_e2e_client;
    use clustercache::{CacheError, LockOptions};
    use futures::TryStreamExt;
    use std::time::Duration;
    use uuid::Uuid;

    /// Unique prefix so parallel runs don't collide
    fn prefix() -> String {
        format!("e2e-{}", Uuid::new_v4().simple())
    }

    #[tokio::test]
    async fn test_e2e_set_get_delete() {
        let client = setup_e2e_client(&prefix()).await;

        assert!(client.set("greeting", &"hello", 60, None).await.unwrap());
        let value: Option<String> = client.get("greeting", None).await.unwrap();
        assert_eq!(value.as_deref(), Some("hello"));

        assert!(client.delete("greeting", None).await.unwrap());
        assert!(!client.has_key("greeting", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_e2e_multi_key_across_slots() {
        let client = setup_e2e_client(&prefix()).await;
        let keys: Vec<String> = (0..50).map(|i| format!("item:{i}")).collect();

        client
            .set_batch(keys.iter().map(|k| (k.as_str(), k.len() as i64)), 60, None)
            .await
            .unwrap();

        let values: Vec<(String, i64)> = client.get_many(&keys, None).await.unwrap();
        assert_eq!(values.len(), keys.len());
        assert_eq!(values[0], ("item:0".to_string(), 6));

        assert_eq!(client.delete_many(&keys, None).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_e2e_incr_and_ttl() {
        let client = setup_e2e_client(&prefix()).await;

        client.set("counter", &1, 120, None).await.unwrap();
        assert_eq!(client.incr("counter", 41, None).await.unwrap(), 42);

        let ttl = client.ttl("counter", None).await.unwrap().unwrap();
        assert!(ttl > 0 && ttl <= 120);

        assert!(client.persist("counter", None).await.unwrap());
        assert_eq!(client.ttl("counter", None).await.unwrap(), None);
        client.delete("counter", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_e2e_incr_version() {
        let client = setup_e2e_client(&prefix()).await;

        client.set("doc", &vec![1, 2, 3], 300, None).await.unwrap();
        assert_eq!(client.incr_version("doc", 1, None).await.unwrap(), 2);

        let moved: Option<Vec<i32>> = client.get("doc", Some(2)).await.unwrap();
        assert_eq!(moved, Some(vec![1, 2, 3]));
        assert!(!client.has_key("doc", Some(1)).await.unwrap());
        client.delete("doc", Some(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_e2e_scan_and_delete_pattern() {
        let client = setup_e2e_client(&prefix()).await;

        for i in 0..20 {
            client.set(&format!("user:{i}"), &i, 60, None).await.unwrap();
        }

        let scanned: Vec<String> = client
            .iter_keys("user:*", Some(5), None)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(scanned.len(), 20);
        assert_eq!(client.keys("user:*", None).await.unwrap().len(), 20);

        assert_eq!(client.delete_pattern("user:*", None).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_e2e_lock() {
        let client = setup_e2e_client(&prefix()).await;
        let options = LockOptions::new()
            .timeout(Duration::from_secs(5))
            .non_blocking();

        let lock = client.lock("job", options, None);
        assert!(lock.acquire().await.unwrap());
        assert!(!client.lock("job", options, None).acquire().await.unwrap());
        lock.release().await.unwrap();

        let err = lock.release().await.unwrap_err();
        assert!(matches!(err, CacheError::LockNotOwned(_)));
    }

    #[tokio::test]
    async fn test_e2e_unreachable_node_is_translated() {
        let config = clustercache::CacheConfig::new("redis://127.0.0.1:1")
            .with_socket_connect_timeout(Duration::from_millis(200));

        match clustercache::CacheClient::connect(config).await {
            Err(err) => assert!(
                err.is_connection_interrupted() || matches!(err, CacheError::Store(_)),
                "unexpected error: {err:?}"
            ),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
