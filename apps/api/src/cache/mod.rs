//! Content-addressed cache of extraction results.
//!
//! Keys are the SHA-256 of the file bytes, so the same resume uploaded twice
//! (or re-queued after a retry) skips extraction. Redis is the primary store;
//! when it cannot be reached the cache runs against a process-local map.
//! Backend failures are logged and counted, never returned to callers.

pub mod backend;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::extraction::{ExtractionResult, FileInfo, TextExtractionService};
use backend::{CacheBackend, MemoryBackend, RedisBackend};

pub const KEY_PREFIX: &str = "extraction_cache:";

const HASH_CHUNK_SIZE: usize = 64 * 1024;
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Persisted form of a cached extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub file_hash: String,
    pub file_size: u64,
    pub mime_type: String,
    pub extraction_result: ExtractionResult,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub backend: String,
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub errors: u64,
    pub total_requests: u64,
    pub hit_rate_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<usize>,
    pub default_ttl_hours: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WarmCacheReport {
    pub already_cached: usize,
    pub newly_cached: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

pub struct ExtractionCache {
    backend: Arc<dyn CacheBackend>,
    default_ttl_hours: u64,
    counters: Counters,
}

impl ExtractionCache {
    /// Prefers Redis when a URL is given; any connection failure falls back
    /// to the in-memory backend.
    pub async fn connect(redis_url: Option<&str>, default_ttl_hours: u64) -> Self {
        if let Some(url) = redis_url {
            match RedisBackend::connect(url, REDIS_CONNECT_TIMEOUT).await {
                Ok(redis) => {
                    info!("Extraction cache using Redis backend");
                    return Self::with_backend(Arc::new(redis), default_ttl_hours);
                }
                Err(e) => {
                    warn!("Redis unavailable ({e}); extraction cache falling back to memory");
                }
            }
        } else {
            info!("No REDIS_URL configured; extraction cache using memory backend");
        }
        Self::in_memory(default_ttl_hours)
    }

    pub fn in_memory(default_ttl_hours: u64) -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()), default_ttl_hours)
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>, default_ttl_hours: u64) -> Self {
        Self {
            backend,
            default_ttl_hours,
            counters: Counters::default(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Looks up a previous extraction of the file at `file_path`. A stored
    /// entry whose size or MIME type disagrees with the current file is
    /// dropped and reported as a miss.
    pub async fn get(&self, file_path: &Path, mime_type: &str) -> Option<ExtractionResult> {
        let file_hash = compute_file_hash(file_path).await;
        let file_size = current_file_size(file_path).await;
        let key = cache_key(&file_hash);

        let entry = match self.backend.load(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                self.record_error("get", &e);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if entry.file_hash != file_hash
            || entry.file_size != file_size
            || !entry.mime_type.eq_ignore_ascii_case(mime_type)
        {
            debug!(key = %key, "Cached entry no longer matches file; invalidating");
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.backend.remove(&key).await {
                self.record_error("invalidate", &e);
            }
            return None;
        }

        let mut entry = entry;
        entry.last_accessed = Utc::now();
        entry.access_count += 1;
        if let Err(e) = self.backend.touch(&key, &entry).await {
            self.record_error("touch", &e);
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, access_count = entry.access_count, "Extraction cache hit");
        Some(entry.extraction_result)
    }

    /// Stores a successful extraction. Failed results are never cached.
    pub async fn store(
        &self,
        file_path: &Path,
        mime_type: &str,
        result: &ExtractionResult,
        ttl_hours: Option<u64>,
    ) -> bool {
        if !result.is_success() {
            debug!(file = %file_path.display(), "Not caching unsuccessful extraction");
            return false;
        }

        let file_hash = compute_file_hash(file_path).await;
        let now = Utc::now();
        let entry = CacheEntry {
            file_size: current_file_size(file_path).await,
            mime_type: mime_type.to_string(),
            extraction_result: result.clone(),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            file_hash,
        };
        let key = cache_key(&entry.file_hash);
        let ttl = Duration::from_secs(ttl_hours.unwrap_or(self.default_ttl_hours) * 3600);

        match self.backend.save(&key, &entry, ttl).await {
            Ok(evicted) => {
                self.counters.stores.fetch_add(1, Ordering::Relaxed);
                if evicted > 0 {
                    self.counters
                        .evictions
                        .fetch_add(evicted as u64, Ordering::Relaxed);
                    debug!(evicted, "Evicted least recently used cache entries");
                }
                true
            }
            Err(e) => {
                self.record_error("store", &e);
                false
            }
        }
    }

    /// Removes every cached extraction; returns how many entries went away.
    pub async fn clear_cache(&self) -> usize {
        match self.backend.clear().await {
            Ok(removed) => {
                info!(removed, "Extraction cache cleared");
                removed
            }
            Err(e) => {
                self.record_error("clear", &e);
                0
            }
        }
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_rate_percent = if total_requests == 0 {
            0.0
        } else {
            (hits as f64 / total_requests as f64 * 10_000.0).round() / 100.0
        };

        CacheStats {
            backend: self.backend.name().to_string(),
            hits,
            misses,
            stores: self.counters.stores.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            total_requests,
            hit_rate_percent,
            entries: self.backend.len_hint(),
            default_ttl_hours: self.default_ttl_hours,
        }
    }

    /// Primes the cache for a batch of files. Each file is reported
    /// independently; only mismatched input lengths are an error.
    pub async fn warm_cache(
        &self,
        file_paths: &[PathBuf],
        mime_types: &[String],
        extraction: &TextExtractionService,
        timeout: Duration,
    ) -> Result<WarmCacheReport, CacheError> {
        if file_paths.len() != mime_types.len() {
            return Err(CacheError::InvalidInput(format!(
                "file_paths ({}) and mime_types ({}) must have the same length",
                file_paths.len(),
                mime_types.len()
            )));
        }

        let mut report = WarmCacheReport::default();
        let mut misses = Vec::new();
        for (path, mime_type) in file_paths.iter().zip(mime_types) {
            if self.get(path, mime_type).await.is_some() {
                report.already_cached += 1;
            } else {
                let info = FileInfo::new(mime_type.clone(), current_file_size(path).await);
                misses.push((path.clone(), info));
            }
        }

        let results = extraction.extract_batch(&misses, timeout).await;
        for ((path, info), result) in misses.iter().zip(results) {
            if !result.is_success() {
                report.failed += 1;
                report.errors.push(format!(
                    "{}: {}",
                    path.display(),
                    result
                        .error_message
                        .as_deref()
                        .unwrap_or("extraction produced no text")
                ));
                continue;
            }

            if self.store(path, &info.file_type, &result, None).await {
                report.newly_cached += 1;
            } else {
                report.failed += 1;
                report
                    .errors
                    .push(format!("{}: failed to store in cache", path.display()));
            }
        }

        info!(
            already_cached = report.already_cached,
            newly_cached = report.newly_cached,
            failed = report.failed,
            "Cache warm-up finished"
        );
        Ok(report)
    }

    fn record_error(&self, op: &str, err: &CacheError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        warn!(backend = self.backend.name(), "Cache {op} failed: {err}");
    }
}

fn cache_key(file_hash: &str) -> String {
    format!("{KEY_PREFIX}{file_hash}")
}

async fn current_file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// SHA-256 of the file contents, read in chunks. Unreadable files hash
/// their path, size and modification time instead.
pub async fn compute_file_hash(path: &Path) -> String {
    match hash_contents(path).await {
        Ok(hash) => hash,
        Err(e) => {
            debug!(file = %path.display(), "Hashing contents failed ({e}); using stat fallback");
            fallback_hash(path)
        }
    }
}

async fn hash_contents(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn fallback_hash(path: &Path) -> String {
    let (size, mtime) = std::fs::metadata(path)
        .map(|m| {
            let mtime = m
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            (m.len(), mtime)
        })
        .unwrap_or((0, 0));

    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{size}:{mtime}", path.display()).as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::Map;
    use tempfile::{NamedTempFile, TempDir};

    use super::*;
    use crate::extraction::test_support::PlainTextExtractor;
    use crate::extraction::MIME_PDF;

    fn ok_result(text: &str) -> ExtractionResult {
        ExtractionResult::completed(text.into(), Map::new(), Duration::from_millis(5))
    }

    fn temp_with(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[tokio::test]
    async fn test_store_then_get_round_trip() {
        let cache = ExtractionCache::in_memory(24);
        let file = temp_with("resume bytes");
        let result = ok_result("Jane Doe");

        assert!(cache.store(file.path(), MIME_PDF, &result, None).await);
        let cached = cache.get(file.path(), MIME_PDF).await.unwrap();
        assert_eq!(cached.extracted_text, result.extracted_text);
        assert_eq!(cached.status, result.status);
    }

    #[tokio::test]
    async fn test_changed_content_misses() {
        let cache = ExtractionCache::in_memory(24);
        let file = temp_with("version one");
        cache
            .store(file.path(), MIME_PDF, &ok_result("v1"), None)
            .await;

        std::fs::write(file.path(), "version two").unwrap();
        assert!(cache.get(file.path(), MIME_PDF).await.is_none());
    }

    #[tokio::test]
    async fn test_mime_mismatch_invalidates_entry() {
        let cache = ExtractionCache::in_memory(24);
        let file = temp_with("bytes");
        cache
            .store(file.path(), MIME_PDF, &ok_result("text"), None)
            .await;

        assert!(cache.get(file.path(), "application/msword").await.is_none());
        // The entry was dropped, so the original MIME type misses too.
        assert!(cache.get(file.path(), MIME_PDF).await.is_none());
        assert_eq!(cache.get_cache_stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_failed_result_is_not_stored() {
        let cache = ExtractionCache::in_memory(24);
        let file = temp_with("bytes");
        let failed = ExtractionResult::failed("boom", Duration::ZERO);

        assert!(!cache.store(file.path(), MIME_PDF, &failed, None).await);
        assert_eq!(cache.get_cache_stats().stores, 0);
    }

    #[tokio::test]
    async fn test_hit_rate_after_three_misses_and_two_hits() {
        let cache = ExtractionCache::in_memory(24);
        let a = temp_with("a");
        let b = temp_with("b");
        let c = temp_with("c");

        for f in [&a, &b, &c] {
            assert!(cache.get(f.path(), MIME_PDF).await.is_none());
        }
        cache.store(a.path(), MIME_PDF, &ok_result("a"), None).await;
        assert!(cache.get(a.path(), MIME_PDF).await.is_some());
        assert!(cache.get(a.path(), MIME_PDF).await.is_some());

        let stats = cache.get_cache_stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.hit_rate_percent, 40.0);
        assert_eq!(stats.backend, "memory");
    }

    #[tokio::test]
    async fn test_clear_cache_counts_entries() {
        let cache = ExtractionCache::in_memory(24);
        let a = temp_with("a");
        let b = temp_with("b");
        cache.store(a.path(), MIME_PDF, &ok_result("a"), None).await;
        cache.store(b.path(), MIME_PDF, &ok_result("b"), None).await;

        assert_eq!(cache.clear_cache().await, 2);
        assert!(cache.get(a.path(), MIME_PDF).await.is_none());
    }

    #[tokio::test]
    async fn test_warm_cache_rejects_mismatched_lengths() {
        let cache = ExtractionCache::in_memory(24);
        let service = TextExtractionService::with_extractors(vec![Arc::new(PlainTextExtractor)]);
        let paths = vec![PathBuf::from("f1"), PathBuf::from("f2")];
        let mimes = vec![MIME_PDF.to_string()];

        let err = cache
            .warm_cache(&paths, &mimes, &service, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidInput(_)));
        assert_eq!(cache.get_cache_stats().total_requests, 0);
    }

    #[tokio::test]
    async fn test_warm_cache_reports_per_file() {
        let cache = ExtractionCache::in_memory(24);
        let service = TextExtractionService::with_extractors(vec![Arc::new(PlainTextExtractor)]);
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.pdf");
        let empty = dir.path().join("empty.pdf");
        std::fs::write(&good, "Jane Doe resume").unwrap();
        std::fs::write(&empty, "").unwrap();

        let paths = vec![good.clone(), empty];
        let mimes = vec![MIME_PDF.to_string(), MIME_PDF.to_string()];

        let first = cache
            .warm_cache(&paths, &mimes, &service, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(first.newly_cached, 1);
        assert_eq!(first.failed, 1);
        assert_eq!(first.errors.len(), 1);

        let second = cache
            .warm_cache(&paths[..1], &mimes[..1], &service, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(second.already_cached, 1);
        assert_eq!(second.newly_cached, 0);
    }

    #[tokio::test]
    async fn test_hash_is_content_addressed() {
        let a = temp_with("same content");
        let b = temp_with("same content");
        assert_eq!(
            compute_file_hash(a.path()).await,
            compute_file_hash(b.path()).await
        );

        let missing = Path::new("/no/such/file.pdf");
        assert_eq!(
            compute_file_hash(missing).await,
            compute_file_hash(missing).await
        );
    }
}
