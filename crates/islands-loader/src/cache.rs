//! Versioned, size-bounded bundle cache
//!
//! Bodies live in a [`BundleStore`]; an in-memory index of their metadata
//! drives lookups and eviction. Every read re-validates the stored checksum,
//! and a corrupted or expired entry is treated as absent and removed.
//!
//! All mutations hold the index lock for their whole duration, so a
//! put/evict cycle is never observable half-done.

use crate::integrity;
use crate::storage::{BundleStorage, BundleStore, Headers, StoredBundle};
use crate::{LoaderError, Priority, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Header names used to carry entry metadata
pub mod headers {
    pub const FRAMEWORK_ID: &str = "x-framework-id";
    pub const VERSION: &str = "x-framework-version";
    pub const SIZE: &str = "x-bundle-size";
    pub const CACHED_AT: &str = "x-cached-at";
    pub const CHECKSUM: &str = "x-checksum";
    pub const DEPENDENCIES: &str = "x-dependencies";
    pub const PRIORITY: &str = "x-priority";
    pub const ACCESS_COUNT: &str = "x-access-count";
    pub const LAST_ACCESSED: &str = "x-last-accessed";
    pub const COMPRESSED: &str = "x-compressed";
}

/// Rule choosing which entry to drop when space is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently accessed first
    #[default]
    Lru,
    /// Lowest access count first
    Lfu,
    /// Lowest priority first, ties by recency
    #[serde(alias = "priority-based")]
    Priority,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Maximum total bundle bytes
    pub max_size: u64,
    /// Maximum entry age in milliseconds (0 disables expiry)
    #[serde(rename = "maxAge")]
    pub max_age_ms: u64,
    /// Eviction policy
    pub eviction_policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 50 * 1024 * 1024,             // 50MB
            max_age_ms: 7 * 24 * 60 * 60 * 1000, // 7 days
            eviction_policy: EvictionPolicy::Lru,
        }
    }
}

impl CacheConfig {
    /// Set maximum size
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set maximum age
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age_ms = max_age.as_millis() as u64;
        self
    }

    /// Set eviction policy
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Maximum entry age, `None` when expiry is disabled
    pub fn max_age(&self) -> Option<Duration> {
        (self.max_age_ms > 0).then(|| Duration::from_millis(self.max_age_ms))
    }
}

/// A cached framework bundle
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub framework_id: String,
    pub version: String,
    pub bundle: Bytes,
    /// Ordered dependency identifiers
    pub dependencies: Vec<String>,
    pub size_bytes: u64,
    /// Hex SHA-256 of `bundle`
    pub checksum: String,
    pub priority: Priority,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
    /// Milliseconds since the Unix epoch
    pub last_accessed_at: u64,
    pub access_count: u64,
    pub compressed: bool,
}

impl CacheEntry {
    /// Create an entry, computing size and checksum from the bundle
    pub fn new(framework_id: impl Into<String>, version: impl Into<String>, bundle: Bytes) -> Self {
        let now = now_ms();
        Self {
            framework_id: framework_id.into(),
            version: version.into(),
            size_bytes: bundle.len() as u64,
            checksum: integrity::checksum(&bundle),
            bundle,
            dependencies: Vec::new(),
            priority: Priority::Normal,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            compressed: false,
        }
    }

    /// With dependencies
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// With priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// With compressed flag
    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Store key (`id@version`)
    pub fn key(&self) -> String {
        cache_key(&self.framework_id, &self.version)
    }

    /// Metadata headers for the bundle store
    pub fn to_headers(&self) -> Headers {
        let mut map = Headers::new();
        map.insert(headers::FRAMEWORK_ID.into(), self.framework_id.clone());
        map.insert(headers::VERSION.into(), self.version.clone());
        map.insert(headers::SIZE.into(), self.size_bytes.to_string());
        map.insert(headers::CACHED_AT.into(), self.created_at.to_string());
        map.insert(headers::CHECKSUM.into(), self.checksum.clone());
        map.insert(headers::DEPENDENCIES.into(), self.dependencies.join(","));
        map.insert(headers::PRIORITY.into(), self.priority.as_str().into());
        map.insert(headers::ACCESS_COUNT.into(), self.access_count.to_string());
        map.insert(headers::LAST_ACCESSED.into(), self.last_accessed_at.to_string());
        map.insert(headers::COMPRESSED.into(), self.compressed.to_string());
        map
    }

    /// Rebuild an entry from a stored bundle
    pub fn from_stored(stored: StoredBundle) -> Result<Self> {
        let meta = EntryMeta::from_headers(&stored.headers, stored.body.len() as u64)?;
        Ok(meta.into_entry(stored.body))
    }
}

/// Store key for a framework version
pub fn cache_key(framework_id: &str, version: &str) -> String {
    format!("{}@{}", framework_id, version)
}

/// Which entries an invalidation removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidatePattern {
    /// Every entry
    All,
    /// Entries whose key starts with the prefix
    Prefix(String),
    /// Every version of one framework
    Framework(String),
}

impl InvalidatePattern {
    /// Parse `*` as [`InvalidatePattern::All`], anything else as a key prefix
    pub fn parse(pattern: &str) -> Self {
        match pattern.trim() {
            "*" | "" => InvalidatePattern::All,
            prefix => InvalidatePattern::Prefix(prefix.to_string()),
        }
    }

    fn matches(&self, key: &str, meta: &EntryMeta) -> bool {
        match self {
            InvalidatePattern::All => true,
            InvalidatePattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
            InvalidatePattern::Framework(id) => meta.framework_id == *id,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub max_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Entries dropped after failing checksum validation
    pub corruptions: u64,
    /// Entries dropped after exceeding `max_age`
    pub expirations: u64,
    /// Puts refused because the entry alone exceeds `max_size`
    pub rejections: u64,
}

impl CacheStats {
    /// Hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of the byte budget in use
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.total_size as f64 / self.max_size as f64
        }
    }
}

/// Entry metadata kept in the index (everything but the body)
#[derive(Debug, Clone)]
struct EntryMeta {
    framework_id: String,
    version: String,
    dependencies: Vec<String>,
    size_bytes: u64,
    checksum: String,
    priority: Priority,
    created_at: u64,
    last_accessed_at: u64,
    access_count: u64,
    compressed: bool,
    /// Logical access clock, orders accesses within the same millisecond
    tick: u64,
}

impl EntryMeta {
    fn from_entry(entry: &CacheEntry, tick: u64) -> Self {
        Self {
            framework_id: entry.framework_id.clone(),
            version: entry.version.clone(),
            dependencies: entry.dependencies.clone(),
            size_bytes: entry.size_bytes,
            checksum: entry.checksum.clone(),
            priority: entry.priority,
            created_at: entry.created_at,
            last_accessed_at: entry.last_accessed_at,
            access_count: entry.access_count,
            compressed: entry.compressed,
            tick,
        }
    }

    fn from_headers(map: &Headers, body_len: u64) -> Result<Self> {
        fn required<'a>(map: &'a Headers, name: &str) -> Result<&'a str> {
            map.get(name)
                .map(String::as_str)
                .ok_or_else(|| LoaderError::Storage(format!("missing header {}", name)))
        }
        fn number(map: &Headers, name: &str) -> Result<u64> {
            map.get(name)
                .map(|v| {
                    v.parse::<u64>()
                        .map_err(|e| LoaderError::Storage(format!("bad header {}: {}", name, e)))
                })
                .unwrap_or(Ok(0))
        }

        let dependencies = map
            .get(headers::DEPENDENCIES)
            .map(|deps| {
                deps.split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let priority = map
            .get(headers::PRIORITY)
            .and_then(|p| Priority::parse(p))
            .unwrap_or_default();

        Ok(Self {
            framework_id: required(map, headers::FRAMEWORK_ID)?.to_string(),
            version: required(map, headers::VERSION)?.to_string(),
            checksum: required(map, headers::CHECKSUM)?.to_string(),
            dependencies,
            size_bytes: body_len,
            priority,
            created_at: number(map, headers::CACHED_AT)?,
            last_accessed_at: number(map, headers::LAST_ACCESSED)?,
            access_count: number(map, headers::ACCESS_COUNT)?,
            compressed: map
                .get(headers::COMPRESSED)
                .map(|v| v == "true")
                .unwrap_or(false),
            tick: 0,
        })
    }

    fn into_entry(self, bundle: Bytes) -> CacheEntry {
        CacheEntry {
            framework_id: self.framework_id,
            version: self.version,
            bundle,
            dependencies: self.dependencies,
            size_bytes: self.size_bytes,
            checksum: self.checksum,
            priority: self.priority,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            access_count: self.access_count,
            compressed: self.compressed,
        }
    }

    fn is_expired(&self, max_age: Option<Duration>, now: u64) -> bool {
        match max_age {
            Some(max_age) => now.saturating_sub(self.created_at) > max_age.as_millis() as u64,
            None => false,
        }
    }

    /// Sort key under a policy (lowest = evicted first)
    fn eviction_rank(&self, policy: EvictionPolicy) -> (u64, u64, u64) {
        match policy {
            EvictionPolicy::Lru => (self.last_accessed_at, self.tick, 0),
            EvictionPolicy::Lfu => (self.access_count, self.last_accessed_at, self.tick),
            EvictionPolicy::Priority => (
                self.priority.rank() as u64,
                self.last_accessed_at,
                self.tick,
            ),
        }
    }
}

#[derive(Default)]
struct CacheIndex {
    entries: HashMap<String, EntryMeta>,
    total_size: u64,
    clock: u64,
    /// Keys whose access metadata changed since the last sync
    dirty: HashSet<String>,
}

impl CacheIndex {
    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, key: String, meta: EntryMeta) {
        self.total_size += meta.size_bytes;
        if let Some(old) = self.entries.insert(key, meta) {
            self.total_size -= old.size_bytes;
        }
    }

    fn remove(&mut self, key: &str) -> Option<EntryMeta> {
        let meta = self.entries.remove(key)?;
        self.total_size -= meta.size_bytes;
        self.dirty.remove(key);
        Some(meta)
    }

    fn victim(&self, policy: EvictionPolicy, keep: Option<&str>) -> Option<String> {
        self.entries
            .iter()
            .filter(|(key, _)| Some(key.as_str()) != keep)
            .min_by_key(|(_, meta)| meta.eviction_rank(policy))
            .map(|(key, _)| key.clone())
    }

    /// Best entry for a version-less lookup: highest priority, then newest
    fn best_for(&self, framework_id: &str, max_age: Option<Duration>, now: u64) -> Option<String> {
        self.entries
            .iter()
            .filter(|(_, meta)| meta.framework_id == framework_id)
            .filter(|(_, meta)| !meta.is_expired(max_age, now))
            .max_by_key(|(_, meta)| (meta.priority.rank(), meta.created_at, meta.tick))
            .map(|(key, _)| key.clone())
    }

    fn newest_for(&self, framework_id: &str) -> Option<String> {
        self.entries
            .iter()
            .filter(|(_, meta)| meta.framework_id == framework_id)
            .max_by_key(|(_, meta)| (meta.created_at, meta.tick))
            .map(|(key, _)| key.clone())
    }
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    corruptions: AtomicU64,
    expirations: AtomicU64,
    rejections: AtomicU64,
}

/// Versioned, size-bounded bundle cache
pub struct CacheStore {
    config: CacheConfig,
    store: Arc<dyn BundleStore>,
    index: Mutex<CacheIndex>,
    counters: CacheCounters,
}

impl CacheStore {
    /// Open the named store from `storage` and rebuild the index
    pub async fn open(config: CacheConfig, storage: &dyn BundleStorage, name: &str) -> Result<Self> {
        let store = storage.open(name).await?;
        Self::with_store(config, store).await
    }

    /// Build a cache over an already opened store
    pub async fn with_store(config: CacheConfig, store: Arc<dyn BundleStore>) -> Result<Self> {
        if config.max_size == 0 {
            return Err(LoaderError::Configuration(
                "cache max size must be greater than zero".into(),
            ));
        }

        let cache = Self {
            config,
            store,
            index: Mutex::new(CacheIndex::default()),
            counters: CacheCounters::default(),
        };

        cache.load_index().await?;

        Ok(cache)
    }

    /// Rebuild the metadata index from the store headers
    async fn load_index(&self) -> Result<()> {
        let mut index = self.index.lock().await;
        let mut loaded: Vec<(String, EntryMeta)> = Vec::new();

        for key in self.store.keys().await? {
            let Some(stored) = self.store.lookup(&key).await? else {
                continue;
            };
            match EntryMeta::from_headers(&stored.headers, stored.body.len() as u64) {
                Ok(meta) => loaded.push((key, meta)),
                Err(e) => {
                    warn!("Dropping unreadable cache entry {}: {}", key, e);
                    self.store.delete(&key).await?;
                }
            }
        }

        // Replay accesses in their recorded order so ticks stay meaningful
        loaded.sort_by_key(|(_, meta)| meta.last_accessed_at);
        for (key, mut meta) in loaded {
            meta.tick = index.next_tick();
            index.insert(key, meta);
        }

        let evicted = self.evict_until_fits(&mut index, 0, None).await?;

        info!(
            entries = index.entries.len(),
            total_size = index.total_size,
            evicted,
            "Loaded bundle cache index"
        );

        Ok(())
    }

    /// Look up a bundle.
    ///
    /// Without a version the highest-priority, most recently created entry
    /// for the framework is returned.
    pub async fn get(&self, framework_id: &str, version: Option<&str>) -> Option<CacheEntry> {
        let now = now_ms();
        let max_age = self.config.max_age();
        let mut index = self.index.lock().await;

        let key = match version {
            Some(version) => cache_key(framework_id, version),
            None => match index.best_for(framework_id, max_age, now) {
                Some(key) => key,
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            },
        };

        let Some(meta) = index.entries.get(&key).cloned() else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if meta.is_expired(max_age, now) {
            debug!(key = %key, "Cache entry expired");
            self.drop_entry(&mut index, &key).await;
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let stored = match self.store.lookup(&key).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!(key = %key, "Cache index entry has no stored body");
                index.remove(&key);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                warn!(key = %key, "Cache read failed: {}", e);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if let Err(actual) = integrity::verify(&stored.body, &meta.checksum) {
            warn!(
                key = %key,
                expected = %meta.checksum,
                actual = %actual,
                "Cache entry failed checksum validation, evicting"
            );
            self.drop_entry(&mut index, &key).await;
            self.counters.corruptions.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let tick = index.next_tick();
        let meta = match index.entries.get_mut(&key) {
            Some(entry) => {
                entry.access_count += 1;
                entry.last_accessed_at = now.max(entry.last_accessed_at);
                entry.tick = tick;
                entry.clone()
            }
            None => meta,
        };
        index.dirty.insert(key);

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(meta.into_entry(stored.body))
    }

    /// Newest entry for a framework regardless of version, priority or age
    pub async fn newest(&self, framework_id: &str) -> Option<CacheEntry> {
        let mut index = self.index.lock().await;
        let key = index.newest_for(framework_id)?;
        let meta = index.entries.get(&key)?.clone();

        match self.store.lookup(&key).await {
            Ok(Some(stored)) if integrity::verify(&stored.body, &meta.checksum).is_ok() => {
                Some(meta.into_entry(stored.body))
            }
            Ok(Some(_)) => {
                warn!(key = %key, "Newest cache entry is corrupted, evicting");
                self.drop_entry(&mut index, &key).await;
                self.counters.corruptions.fetch_add(1, Ordering::Relaxed);
                None
            }
            _ => None,
        }
    }

    /// Check for a live entry without touching it
    pub async fn contains(&self, framework_id: &str, version: &str) -> bool {
        let index = self.index.lock().await;
        index
            .entries
            .get(&cache_key(framework_id, version))
            .map(|meta| !meta.is_expired(self.config.max_age(), now_ms()))
            .unwrap_or(false)
    }

    /// Store an entry, evicting others first if it would not fit
    pub async fn put(&self, mut entry: CacheEntry) -> Result<()> {
        let key = entry.key();
        entry.size_bytes = entry.bundle.len() as u64;

        if let Err(actual) = integrity::verify(&entry.bundle, &entry.checksum) {
            return Err(LoaderError::CacheCorruption {
                key,
                expected: entry.checksum,
                actual,
            });
        }

        if entry.size_bytes > self.config.max_size {
            self.counters.rejections.fetch_add(1, Ordering::Relaxed);
            return Err(LoaderError::EntryTooLarge {
                key,
                size: entry.size_bytes,
                max_size: self.config.max_size,
            });
        }

        let mut index = self.index.lock().await;

        self.evict_until_fits(&mut index, entry.size_bytes, Some(&key)).await?;

        // The index keeps the old entry until the new body is stored
        let stored = StoredBundle::new(entry.to_headers(), entry.bundle.clone());
        if let Err(e) = self.store.put(&key, stored).await {
            self.drop_entry(&mut index, &key).await;
            return Err(e);
        }

        let tick = index.next_tick();
        index.insert(key.clone(), EntryMeta::from_entry(&entry, tick));

        debug!(
            key = %key,
            size = entry.size_bytes,
            total_size = index.total_size,
            "Cached bundle"
        );

        Ok(())
    }

    /// Remove entries matching the pattern, returning how many were removed
    pub async fn invalidate(&self, pattern: &InvalidatePattern) -> Result<usize> {
        let mut index = self.index.lock().await;

        let keys: Vec<String> = index
            .entries
            .iter()
            .filter(|(key, meta)| pattern.matches(key, meta))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            self.store.delete(key).await?;
            index.remove(key);
        }

        info!(pattern = ?pattern, removed = keys.len(), "Invalidated cache entries");
        Ok(keys.len())
    }

    /// Evict a single entry
    pub async fn evict(&self, framework_id: &str, version: &str) -> Result<bool> {
        let key = cache_key(framework_id, version);
        let mut index = self.index.lock().await;

        if index.entries.contains_key(&key) {
            self.store.delete(&key).await?;
            index.remove(&key);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Drop expired entries, returning how many were removed
    pub async fn sweep_expired(&self) -> Result<usize> {
        let mut index = self.index.lock().await;
        self.sweep_locked(&mut index).await
    }

    /// Write back access metadata changed since the last sync
    pub async fn sync(&self) -> Result<usize> {
        let mut index = self.index.lock().await;
        let dirty: Vec<String> = index.dirty.drain().collect();
        let mut written = 0;

        for key in dirty {
            let Some(meta) = index.entries.get(&key).cloned() else {
                continue;
            };
            if let Some(stored) = self.store.lookup(&key).await? {
                let entry = meta.into_entry(stored.body.clone());
                self.store
                    .put(&key, StoredBundle::new(entry.to_headers(), stored.body))
                    .await?;
                written += 1;
            }
        }

        debug!("Synced access metadata for {} cache entries", written);
        Ok(written)
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let index = self.index.lock().await;
        CacheStats {
            entries: index.entries.len(),
            total_size: index.total_size,
            max_size: self.config.max_size,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            corruptions: self.counters.corruptions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            rejections: self.counters.rejections.load(Ordering::Relaxed),
        }
    }

    /// Cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    async fn sweep_locked(&self, index: &mut CacheIndex) -> Result<usize> {
        let now = now_ms();
        let max_age = self.config.max_age();

        let expired: Vec<String> = index
            .entries
            .iter()
            .filter(|(_, meta)| meta.is_expired(max_age, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.store.delete(key).await?;
            index.remove(key);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
        }

        Ok(expired.len())
    }

    /// Evict until `incoming` more bytes fit within `max_size`
    /// Evict until `incoming` bytes fit. The entry under `replacing` is
    /// never a victim and its bytes do not count, since the write replaces it.
    async fn evict_until_fits(
        &self,
        index: &mut CacheIndex,
        incoming: u64,
        replacing: Option<&str>,
    ) -> Result<usize> {
        let over_budget = |index: &CacheIndex| {
            let replaced = replacing
                .and_then(|key| index.entries.get(key))
                .map_or(0, |meta| meta.size_bytes);
            index.total_size - replaced + incoming > self.config.max_size
        };
        if !over_budget(&*index) {
            return Ok(0);
        }

        let mut evicted = self.sweep_locked(index).await?;
        let mut freed = 0u64;

        while over_budget(&*index) {
            let Some(victim) = index.victim(self.config.eviction_policy, replacing) else {
                break;
            };
            self.store.delete(&victim).await?;
            if let Some(meta) = index.remove(&victim) {
                freed += meta.size_bytes;
            }
            evicted += 1;
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            policy = ?self.config.eviction_policy,
            evicted,
            freed,
            "Evicted bundles from cache"
        );
        Ok(evicted)
    }

    /// Remove an entry after a failed read; store errors are only logged
    async fn drop_entry(&self, index: &mut CacheIndex, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(key = %key, "Failed to delete cache entry: {}", e);
        }
        index.remove(key);
    }
}

/// Milliseconds since the Unix epoch
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
