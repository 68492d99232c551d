//! Redis Cluster store
//!
//! Single-key commands go through the cluster connection, which routes them
//! by hash slot. Multi-key commands are split per slot with
//! [`group_by_slot`](super::hash_slot::group_by_slot). Whole-keyspace commands
//! (`KEYS`, `SCAN`, `FLUSHDB`) are sent to every master listed by
//! `CLUSTER NODES` over direct node connections.

use super::hash_slot::group_by_slot;
use super::{BatchSet, ClusterStore, KeyStream, SetCondition, StoreResult};
use crate::config::CacheConfig;
use crate::error::{CacheError, ErrorTranslator, Result, StoreError};
use async_trait::async_trait;
use futures::Stream;
use futures::future::try_join_all;
use redis::aio::MultiplexedConnection;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{ErrorKind, RedisError, RedisResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Keys requested per `SCAN` call when the caller gives no hint
const DEFAULT_SCAN_COUNT: usize = 100;

/// Compare-and-delete used to release locks
const UNLOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        let message = err.to_string();
        if err.is_timeout() {
            Self::Timeout(message)
        } else if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error()
        {
            Self::Connection(message)
        } else {
            match err.kind() {
                ErrorKind::ResponseError | ErrorKind::ExtensionError => Self::Response(message),
                ErrorKind::TypeError => Self::Protocol(message),
                _ => Self::Other(message),
            }
        }
    }
}

/// [`ClusterStore`] over `redis::cluster_async`
#[derive(Clone)]
pub struct RedisClusterStore {
    conn: ClusterConnection,
    seeds: Vec<String>,
    description: String,
    connect_timeout: Option<Duration>,
    response_timeout: Option<Duration>,
}

impl RedisClusterStore {
    /// Connect to the cluster through the configured seed nodes
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let seeds = config.server_urls()?;
        let description = describe_seeds(&seeds);
        let connect_timeout = config.connect_timeout();
        let response_timeout = config.response_timeout();

        let mut builder = ClusterClient::builder(seeds.clone());
        if let Some(timeout) = connect_timeout {
            builder = builder.connection_timeout(timeout);
        }
        if let Some(timeout) = response_timeout {
            builder = builder.response_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| CacheError::ImproperlyConfigured(e.to_string()))?;

        let conn = client
            .get_async_connection()
            .await
            .map_err(|e| ErrorTranslator::new(description.as_str()).translate(e.into()))?;

        info!("Connected to {}", description);

        Ok(Self {
            conn,
            seeds,
            description,
            connect_timeout,
            response_timeout,
        })
    }

    /// Seed node URLs this store was created with
    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    /// URLs of every reachable master, from `CLUSTER NODES`
    async fn masters(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let nodes: String = redis::cmd("CLUSTER")
            .arg("NODES")
            .query_async(&mut conn)
            .await?;

        let seed = self.seeds.first().map(String::as_str).unwrap_or_default();
        let masters: Vec<String> = parse_masters(&nodes)
            .into_iter()
            .filter_map(|addr| node_url(seed, addr))
            .collect();

        if masters.is_empty() {
            return Err(StoreError::Other(
                "CLUSTER NODES listed no reachable master".to_string(),
            ));
        }
        debug!("Cluster masters: {:?}", masters);
        Ok(masters)
    }

    async fn node_connection(&self, url: &str) -> StoreResult<MultiplexedConnection> {
        let client = redis::Client::open(url)?;
        let connect = client.get_multiplexed_async_connection();
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| StoreError::Timeout(format!("Timeout connecting to {url}")))?
                .map_err(StoreError::from),
            None => Ok(connect.await?),
        }
    }

    /// Apply the response timeout to a direct node request
    async fn bounded<T>(&self, request: impl Future<Output = RedisResult<T>>) -> StoreResult<T> {
        match self.response_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| StoreError::Timeout("Timeout reading from node".to_string()))?
                .map_err(StoreError::from),
            None => Ok(request.await?),
        }
    }

    /// Run `command` on every master and collect the replies
    async fn on_masters<T>(&self, command: &redis::Cmd) -> StoreResult<Vec<T>>
    where
        T: redis::FromRedisValue + Send,
    {
        let masters = self.masters().await?;
        let requests = masters.iter().map(|url| async move {
            let mut conn = self.node_connection(url).await?;
            self.bounded(command.query_async(&mut conn)).await
        });
        try_join_all(requests).await
    }
}

fn scan_masters(
    store: RedisClusterStore,
    pattern: String,
    count: usize,
) -> impl Stream<Item = StoreResult<String>> + Send + 'static {
    async_stream::stream! {
        let masters = match store.masters().await {
            Ok(masters) => masters,
            Err(err) => {
                yield Err(err);
                return;
            }
        };

        for url in masters {
            let mut conn = match store.node_connection(&url).await {
                Ok(conn) => conn,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            let mut cursor: u64 = 0;
            loop {
                let mut command = redis::cmd("SCAN");
                command.arg(cursor).arg("MATCH").arg(&pattern).arg("COUNT").arg(count);
                let reply: StoreResult<(u64, Vec<String>)> =
                    store.bounded(command.query_async(&mut conn)).await;

                let (next, keys) = match reply {
                    Ok(reply) => reply,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                for key in keys {
                    yield Ok(key);
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
        }
    }
}

#[async_trait]
impl ClusterStore for RedisClusterStore {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        debug!("GET key={}", key);
        let mut conn = self.conn.clone();
        Ok(redis::cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        debug!("MGET count={}", keys.len());
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let groups = group_by_slot(keys.iter().map(String::as_str));
        let requests = groups.into_values().map(|indices| {
            let mut conn = self.conn.clone();
            async move {
                let mut command = redis::cmd("MGET");
                for &index in &indices {
                    command.arg(&keys[index]);
                }
                let values: Vec<Option<Vec<u8>>> = command.query_async(&mut conn).await?;
                Ok::<_, StoreError>((indices, values))
            }
        });

        let mut results = vec![None; keys.len()];
        for (indices, values) in try_join_all(requests).await? {
            for (index, value) in indices.into_iter().zip(values) {
                results[index] = value;
            }
        }
        Ok(results)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        condition: SetCondition,
        expire_secs: Option<u64>,
    ) -> StoreResult<bool> {
        debug!("SET key={}, size={}, ex={:?}", key, value.len(), expire_secs);

        let mut command = redis::cmd("SET");
        command.arg(key).arg(value.as_slice());
        if let Some(secs) = expire_secs {
            command.arg("EX").arg(secs);
        }
        if condition.nx {
            command.arg("NX");
        } else if condition.xx {
            command.arg("XX");
        }

        let mut conn = self.conn.clone();
        let reply: Option<String> = command.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn set_batch(&self, entries: Vec<BatchSet>) -> StoreResult<()> {
        debug!("SET batch count={}", entries.len());
        if entries.is_empty() {
            return Ok(());
        }

        let groups = group_by_slot(entries.iter().map(|e| e.key.as_str()));
        let requests = groups.into_values().map(|indices| {
            let mut pipe = redis::pipe();
            for index in indices {
                let entry = &entries[index];
                let command = pipe.cmd("SET").arg(&entry.key).arg(entry.value.as_slice());
                if let Some(secs) = entry.expire_secs {
                    command.arg("EX").arg(secs);
                }
                command.ignore();
            }
            let mut conn = self.conn.clone();
            async move {
                let _: () = pipe.query_async(&mut conn).await?;
                Ok::<_, StoreError>(())
            }
        });

        try_join_all(requests).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        debug!("DEL count={}", keys.len());
        if keys.is_empty() {
            return Ok(0);
        }

        let groups = group_by_slot(keys.iter().map(String::as_str));
        let requests = groups.into_values().map(|indices| {
            let mut command = redis::cmd("DEL");
            for index in indices {
                command.arg(&keys[index]);
            }
            let mut conn = self.conn.clone();
            async move {
                let removed: u64 = command.query_async(&mut conn).await?;
                Ok::<_, StoreError>(removed)
            }
        });

        Ok(try_join_all(requests).await?.into_iter().sum())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        Ok(redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?)
    }

    async fn incr(&self, key: &str, amount: i64) -> StoreResult<i64> {
        debug!("INCRBY key={}, amount={}", key, amount);
        let mut conn = self.conn.clone();
        let reply: RedisResult<i64> = redis::cmd("INCRBY")
            .arg(key)
            .arg(amount)
            .query_async(&mut conn)
            .await;

        reply.map_err(|err| {
            if err.kind() == ErrorKind::ResponseError && err.to_string().contains("not an integer")
            {
                StoreError::IncrNotInteger
            } else {
                err.into()
            }
        })
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        Ok(redis::cmd("TTL").arg(key).query_async(&mut conn).await?)
    }

    async fn persist(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        Ok(redis::cmd("PERSIST").arg(key).query_async(&mut conn).await?)
    }

    async fn expire(&self, key: &str, seconds: i64) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        Ok(redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut conn)
            .await?)
    }

    fn scan(&self, pattern: &str, count: Option<usize>) -> KeyStream {
        Box::pin(scan_masters(
            self.clone(),
            pattern.to_string(),
            count.unwrap_or(DEFAULT_SCAN_COUNT),
        ))
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        debug!("KEYS pattern={}", pattern);
        let mut command = redis::cmd("KEYS");
        command.arg(pattern);
        let replies: Vec<Vec<String>> = self.on_masters(&command).await?;
        Ok(replies.into_iter().flatten().collect())
    }

    async fn flush(&self) -> StoreResult<()> {
        info!("FLUSHDB on every master of {}", self.description);
        let replies: Vec<()> = self.on_masters(&redis::cmd("FLUSHDB")).await?;
        debug!("Flushed {} masters", replies.len());
        Ok(())
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        let mut command = redis::cmd("SET");
        command.arg(key).arg(token).arg("NX");
        if let Some(ttl) = ttl {
            command.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }

        let mut conn = self.conn.clone();
        let reply: Option<String> = command.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, key: &str, token: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::Script::new(UNLOCK_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }
}

/// `redis-cluster[host:port,...]`
fn describe_seeds(seeds: &[String]) -> String {
    let nodes: Vec<String> = seeds
        .iter()
        .map(|seed| match url::Url::parse(seed) {
            Ok(url) => format!(
                "{}:{}",
                url.host_str().unwrap_or_default(),
                url.port().unwrap_or(6379)
            ),
            Err(_) => seed.clone(),
        })
        .collect();
    format!("redis-cluster[{}]", nodes.join(","))
}

/// `host:port` of every healthy master in a `CLUSTER NODES` reply
fn parse_masters(nodes: &str) -> Vec<&str> {
    nodes
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _id = fields.next()?;
            let addr = fields.next()?;
            let flags = fields.next()?;

            let flags: Vec<&str> = flags.split(',').collect();
            let healthy = !flags
                .iter()
                .any(|f| matches!(*f, "fail" | "noaddr" | "handshake"));
            if !flags.contains(&"master") || !healthy {
                return None;
            }

            // ip:port@cport[,hostname]
            addr.split('@').next()
        })
        .collect()
}

/// Node URL reusing the seed's scheme and credentials
fn node_url(seed: &str, addr: &str) -> Option<String> {
    let (host, port) = addr.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;

    let mut url = url::Url::parse(seed).ok()?;
    if !host.is_empty() {
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        url.set_host(Some(&host)).ok()?;
    }
    url.set_port(Some(port)).ok()?;
    Some(url.to_string())
}
