//! Query result cache.
//!
//! Entries are keyed by the query's cache identifier when it has one, and by
//! the query text (SQL plus serialized parameters) otherwise. Results are
//! stored as JSON so any store can hold them.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default maximum number of entries held by [`MemoryResultCache`].
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// A stored query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache identifier set on the query, if any.
    pub identifier: Option<String>,
    /// SQL text followed by the serialized parameter list.
    pub query: String,
    /// Store time in milliseconds since the Unix epoch.
    pub time: u64,
    /// Lifetime in milliseconds.
    pub duration: u64,
    /// JSON-encoded rows.
    pub result: String,
}

impl CacheEntry {
    /// Key the entry is stored under.
    pub fn key(&self) -> &str {
        self.identifier.as_deref().unwrap_or(&self.query)
    }
}

/// Result cache store.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Look up an entry. Expired entries are returned too; callers check
    /// [`ResultCache::is_expired`].
    async fn get(
        &self,
        identifier: Option<&str>,
        query: &str,
        duration: Duration,
    ) -> Result<Option<CacheEntry>>;

    /// Whether the entry's lifetime has elapsed.
    fn is_expired(&self, entry: &CacheEntry) -> bool;

    /// Store a result. `previous` is the entry returned by the preceding
    /// lookup, for stores that update in place.
    async fn store(
        &self,
        identifier: Option<&str>,
        query: &str,
        result: String,
        duration: Duration,
        previous: Option<&CacheEntry>,
    ) -> Result<()>;

    /// Remove entries by identifier.
    async fn remove(&self, identifiers: &[String]) -> Result<()>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;
}

/// Millisecond clock used for entry timestamps.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn system_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    /// Get eviction count.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(AtomicOrdering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// In-process result cache backed by a concurrent map.
pub struct MemoryResultCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
    clock: Clock,
    stats: CacheStats,
}

impl MemoryResultCache {
    /// Create a cache holding up to [`DEFAULT_MAX_ENTRIES`] entries.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: DEFAULT_MAX_ENTRIES,
            clock: Arc::new(system_clock),
            stats: CacheStats::default(),
        }
    }

    /// Set the capacity.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().time)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }
}

impl Default for MemoryResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryResultCache")
            .field("entries", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .field("stats", &self.stats)
            .finish()
    }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn get(
        &self,
        identifier: Option<&str>,
        query: &str,
        _duration: Duration,
    ) -> Result<Option<CacheEntry>> {
        let key = identifier.unwrap_or(query);
        let found = self
            .entries
            .get(key)
            .map(|entry| entry.value().clone())
            // without an identifier the key is the query itself
            .filter(|entry| identifier.is_some() || entry.query == query);

        match &found {
            Some(entry) if !self.is_expired(entry) => {
                self.stats.hits.fetch_add(1, AtomicOrdering::Relaxed)
            }
            _ => self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed),
        };
        Ok(found)
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.time.saturating_add(entry.duration) < (self.clock)()
    }

    async fn store(
        &self,
        identifier: Option<&str>,
        query: &str,
        result: String,
        duration: Duration,
        _previous: Option<&CacheEntry>,
    ) -> Result<()> {
        let entry = CacheEntry {
            identifier: identifier.map(str::to_string),
            query: query.to_string(),
            time: (self.clock)(),
            duration: duration.as_millis() as u64,
            result,
        };
        let key = entry.key().to_string();
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_oldest();
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    async fn remove(&self, identifiers: &[String]) -> Result<()> {
        for identifier in identifiers {
            self.entries.remove(identifier);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}
