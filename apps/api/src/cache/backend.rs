//! Storage backends for the extraction cache. Both expose the same contract;
//! `ExtractionCache` picks one at construction.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use super::{CacheEntry, CacheError, KEY_PREFIX};

/// In-memory store size that triggers eviction.
pub const MEMORY_MAX_ENTRIES: usize = 1000;
/// Entries dropped per eviction pass.
pub const MEMORY_EVICTION_BATCH: usize = 100;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Stores `entry`; returns how many entries were evicted to make room.
    async fn save(
        &self,
        key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<usize, CacheError>;

    /// Persists updated access metadata without changing the expiry.
    async fn touch(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Removes every cache entry; returns how many were removed.
    async fn clear(&self) -> Result<usize, CacheError>;

    /// Entry count when cheaply known.
    fn len_hint(&self) -> Option<usize>;
}

// ────────────────────────────────────────────────────────────────────────────
// Redis
// ────────────────────────────────────────────────────────────────────────────

/// Shared across processes; expiry handled by Redis `SETEX`.
pub struct RedisBackend {
    conn: MultiplexedConnection,
}

impl RedisBackend {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let mut conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| CacheError::Unavailable(format!("connection to {url} timed out")))??;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(CacheError::from))
            .transpose()
    }

    async fn save(
        &self,
        key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<usize, CacheError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(entry)?;
        let _: () = conn.set_ex(key, json, ttl.as_secs().max(1)).await?;
        Ok(0)
    }

    async fn touch(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(entry)?;
        // XX: never resurrect a key that expired between load and touch.
        let _: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(json)
            .arg("KEEPTTL")
            .arg("XX")
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{KEY_PREFIX}*"))
            .query_async(&mut conn)
            .await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: usize = conn.del(&keys).await?;
        Ok(removed)
    }

    fn len_hint(&self) -> Option<usize> {
        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory fallback (process-local)
// ────────────────────────────────────────────────────────────────────────────

struct MemorySlot {
    entry: CacheEntry,
    expires_at: DateTime<Utc>,
    /// Insertion sequence; breaks `last_accessed` ties during eviction.
    seq: u64,
}

#[derive(Default)]
struct MemoryStore {
    slots: HashMap<String, MemorySlot>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MemoryBackend {
    store: Mutex<MemoryStore>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the `MEMORY_EVICTION_BATCH` least recently accessed entries once
    /// the store grows past `MEMORY_MAX_ENTRIES`.
    fn evict_if_needed(store: &mut MemoryStore) -> usize {
        if store.slots.len() <= MEMORY_MAX_ENTRIES {
            return 0;
        }
        let mut by_age: Vec<(DateTime<Utc>, u64, String)> = store
            .slots
            .iter()
            .map(|(k, s)| (s.entry.last_accessed, s.seq, k.clone()))
            .collect();
        by_age.sort();

        let mut evicted = 0;
        for (_, _, key) in by_age.into_iter().take(MEMORY_EVICTION_BATCH) {
            if store.slots.remove(&key).is_some() {
                evicted += 1;
            }
        }
        evicted
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut store = self.store.lock();
        let expired = match store.slots.get(key) {
            Some(slot) if slot.expires_at <= Utc::now() => true,
            Some(slot) => return Ok(Some(slot.entry.clone())),
            None => return Ok(None),
        };
        if expired {
            store.slots.remove(key);
        }
        Ok(None)
    }

    async fn save(
        &self,
        key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<usize, CacheError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CacheError::Unavailable(format!("invalid ttl: {e}")))?;
        let mut store = self.store.lock();
        let seq = store.next_seq;
        store.next_seq += 1;
        store.slots.insert(
            key.to_string(),
            MemorySlot {
                entry: entry.clone(),
                expires_at: Utc::now() + ttl,
                seq,
            },
        );
        Ok(Self::evict_if_needed(&mut store))
    }

    async fn touch(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        if let Some(slot) = self.store.lock().slots.get_mut(key) {
            slot.entry = entry.clone();
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.store.lock().slots.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        let mut store = self.store.lock();
        let removed = store.slots.len();
        store.slots.clear();
        Ok(removed)
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.store.lock().slots.len())
    }
}
