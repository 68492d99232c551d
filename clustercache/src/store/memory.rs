//! In-process store
//!
//! Behaves like a single Redis node for the primitives the client uses: TTLs,
//! NX/XX writes, `INCRBY` semantics and glob patterns. Faults can be queued
//! with [`MemoryStore::fail_next`] to exercise error handling.

use super::{BatchSet, ClusterStore, KeyStream, SetCondition, StoreResult, TTL_MISSING, TTL_PERSISTENT};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Stored value with optional expiration
#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            data,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    /// Remaining seconds, rounded like Redis `TTL`
    fn ttl_secs(&self) -> i64 {
        match self.expires_at {
            None => TTL_PERSISTENT,
            Some(at) => {
                let millis = at.saturating_duration_since(Instant::now()).as_millis() as i64;
                (millis + 500) / 1000
            }
        }
    }
}

/// In-memory [`ClusterStore`]
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<HashMap<String, StoredValue>>>,
    faults: Arc<Mutex<VecDeque<StoreError>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next primitive call fail with `err`
    ///
    /// Queued faults are consumed in order, one per call.
    pub fn fail_next(&self, err: StoreError) {
        self.faults.lock().push_back(err);
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.data.read().values().filter(|v| !v.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw stored bytes for a physical key
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.data
            .read()
            .get(key)
            .filter(|v| !v.is_expired())
            .map(|v| v.data.clone())
    }

    fn check_fault(&self) -> StoreResult<()> {
        match self.faults.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn live_get(data: &mut HashMap<String, StoredValue>, key: &str) -> Option<StoredValue> {
        match data.get(key) {
            Some(value) if value.is_expired() => {
                data.remove(key);
                None
            }
            other => other.cloned(),
        }
    }

    fn matching_keys(&self, pattern: &str) -> Vec<String> {
        let data = self.data.read();
        let mut keys: Vec<String> = data
            .iter()
            .filter(|(k, v)| !v.is_expired() && glob_match(pattern.as_bytes(), k.as_bytes()))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check_fault()?;
        debug!("GET key={}", key);
        Ok(Self::live_get(&mut self.data.write(), key).map(|v| v.data))
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.check_fault()?;
        debug!("MGET count={}", keys.len());
        let mut data = self.data.write();
        Ok(keys
            .iter()
            .map(|key| Self::live_get(&mut data, key).map(|v| v.data))
            .collect())
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        condition: SetCondition,
        expire_secs: Option<u64>,
    ) -> StoreResult<bool> {
        self.check_fault()?;
        debug!(
            "SET key={}, size={}, ex={:?}, nx={}, xx={}",
            key,
            value.len(),
            expire_secs,
            condition.nx,
            condition.xx
        );

        let mut data = self.data.write();
        let exists = Self::live_get(&mut data, key).is_some();
        if (condition.nx && exists) || (condition.xx && !exists) {
            return Ok(false);
        }

        data.insert(
            key.to_string(),
            StoredValue::new(value, expire_secs.map(Duration::from_secs)),
        );
        Ok(true)
    }

    async fn set_batch(&self, entries: Vec<BatchSet>) -> StoreResult<()> {
        self.check_fault()?;
        debug!("SET batch count={}", entries.len());

        let mut data = self.data.write();
        for entry in entries {
            data.insert(
                entry.key,
                StoredValue::new(entry.value, entry.expire_secs.map(Duration::from_secs)),
            );
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        self.check_fault()?;
        debug!("DEL count={}", keys.len());

        let mut data = self.data.write();
        let mut removed = 0;
        for key in keys {
            if let Some(value) = data.remove(key) {
                if !value.is_expired() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check_fault()?;
        Ok(Self::live_get(&mut self.data.write(), key).is_some())
    }

    async fn incr(&self, key: &str, amount: i64) -> StoreResult<i64> {
        self.check_fault()?;
        debug!("INCRBY key={}, amount={}", key, amount);

        let mut data = self.data.write();
        let current = Self::live_get(&mut data, key);

        let (value, expires_at) = match current {
            Some(stored) => {
                let value = std::str::from_utf8(&stored.data)
                    .ok()
                    .filter(|s| !s.starts_with('+'))
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or(StoreError::IncrNotInteger)?;
                (value, stored.expires_at)
            }
            None => (0, None),
        };

        let updated = value.checked_add(amount).ok_or_else(|| {
            StoreError::Response("ERR increment or decrement would overflow".to_string())
        })?;

        data.insert(
            key.to_string(),
            StoredValue {
                data: updated.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(updated)
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        self.check_fault()?;
        Ok(Self::live_get(&mut self.data.write(), key)
            .map(|v| v.ttl_secs())
            .unwrap_or(TTL_MISSING))
    }

    async fn persist(&self, key: &str) -> StoreResult<bool> {
        self.check_fault()?;

        let mut data = self.data.write();
        if Self::live_get(&mut data, key).is_none() {
            return Ok(false);
        }
        match data.get_mut(key) {
            Some(value) if value.expires_at.is_some() => {
                value.expires_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire(&self, key: &str, seconds: i64) -> StoreResult<bool> {
        self.check_fault()?;

        let mut data = self.data.write();
        if Self::live_get(&mut data, key).is_none() {
            return Ok(false);
        }
        if seconds <= 0 {
            data.remove(key);
            return Ok(true);
        }
        if let Some(value) = data.get_mut(key) {
            value.expires_at = Some(Instant::now() + Duration::from_secs(seconds as u64));
        }
        Ok(true)
    }

    fn scan(&self, pattern: &str, _count: Option<usize>) -> KeyStream {
        if let Err(err) = self.check_fault() {
            return Box::pin(futures::stream::once(async move { Err::<String, _>(err) }));
        }
        let keys = self.matching_keys(pattern);
        Box::pin(futures::stream::iter(
            keys.into_iter().map(Ok::<String, StoreError>),
        ))
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.check_fault()?;
        Ok(self.matching_keys(pattern))
    }

    async fn flush(&self) -> StoreResult<()> {
        self.check_fault()?;
        self.data.write().clear();
        Ok(())
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        self.check_fault()?;

        let mut data = self.data.write();
        if Self::live_get(&mut data, key).is_some() {
            return Ok(false);
        }
        data.insert(
            key.to_string(),
            StoredValue::new(token.as_bytes().to_vec(), ttl),
        );
        Ok(true)
    }

    async fn unlock(&self, key: &str, token: &str) -> StoreResult<bool> {
        self.check_fault()?;

        let mut data = self.data.write();
        match Self::live_get(&mut data, key) {
            Some(value) if value.data == token.as_bytes() => {
                data.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Redis-style glob matching: `*`, `?`, `[abc]`, `[^a-z]` and `\` escapes
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((&b'*', rest)) => {
            // Collapse runs of '*'
            let rest = {
                let skip = rest.iter().take_while(|&&b| b == b'*').count();
                &rest[skip..]
            };
            if rest.is_empty() {
                return true;
            }
            (0..=text.len()).any(|start| glob_match(rest, &text[start..]))
        }
        Some((&b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((&b'[', rest)) => match text.split_first() {
            None => false,
            Some((&c, text_rest)) => match match_class(rest, c) {
                Some((matched, after)) => matched && glob_match(after, text_rest),
                None => false,
            },
        },
        Some((&b'\\', rest)) if !rest.is_empty() => {
            text.first() == Some(&rest[0]) && glob_match(&rest[1..], &text[1..])
        }
        Some((&p, rest)) => text.first() == Some(&p) && glob_match(rest, &text[1..]),
    }
}

/// Match `c` against the class body following `[`; returns the pattern after `]`
fn match_class(mut class: &[u8], c: u8) -> Option<(bool, &[u8])> {
    let negate = class.first() == Some(&b'^');
    if negate {
        class = &class[1..];
    }

    let mut matched = false;
    loop {
        match class {
            [] => return None,
            [b']', rest @ ..] => return Some((matched != negate, rest)),
            [b'\\', escaped, rest @ ..] => {
                matched |= *escaped == c;
                class = rest;
            }
            [start, b'-', end, rest @ ..] if *end != b']' => {
                let (lo, hi) = if start <= end { (*start, *end) } else { (*end, *start) };
                matched |= (lo..=hi).contains(&c);
                class = rest;
            }
            [single, rest @ ..] => {
                matched |= *single == c;
                class = rest;
            }
        }
    }
}
