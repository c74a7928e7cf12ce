use crate::error::{Error, Result};
use crate::storage::{KeyValueStore, StoreMap};
use chrono::{DateTime, Duration, Utc};
use getset::Getters;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::task::JoinHandle;

/// Storage key the cache snapshot lives under.
pub const SNAPSHOT_KEY: &str = "translationCache";

const SNAPSHOT_VERSION: u32 = 1;

/// Configuration for the translation cache
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// How long a translation stays valid after it was stored
    pub ttl: Duration,
    /// Maximum number of cached entries
    pub max_entries: usize,
    /// Whether caching is enabled
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(24),
            max_entries: 1000,
            enabled: true,
        }
    }
}

impl CacheConfig {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            enabled: true,
        }
    }
}

/// Cache key derived from the source language hint and the original text
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(source_lang: &str, text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source_lang.as_bytes());
        // Separator keeps ("ab", "c") and ("a", "bc") apart.
        hasher.update([0x1f]);
        hasher.update(text.as_bytes());
        CacheKey(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A cached translation with its access metadata
#[derive(Clone, Debug, PartialEq, Getters, Serialize, Deserialize)]
#[get = "pub"]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    translated_text: String,
    engine: String,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        translated_text: impl Into<String>,
        engine: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            translated_text: translated_text.into(),
            engine: engine.into(),
            created_at: now,
            last_accessed: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotEntry {
    key: String,
    #[serde(flatten)]
    entry: CacheEntry,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheSnapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: Vec<SnapshotEntry>,
}

/// LRU + TTL translation cache.
///
/// Entries are kept in access order: the front of the map is the least
/// recently used entry, the back the most recent one. Lookups move the entry
/// to the back, inserts append, so ties on access time fall back to
/// insertion order.
pub struct TranslationCache {
    entries: Mutex<IndexMap<CacheKey, CacheEntry>>,
    config: RwLock<CacheConfig>,
    dirty: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TranslationCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            config: RwLock::new(config),
            dirty: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, IndexMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> CacheConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get a cached translation if present and not expired
    pub fn get(&self, source_lang: &str, text: &str) -> Option<CacheEntry> {
        self.get_at(source_lang, text, Utc::now())
    }

    pub fn get_at(&self, source_lang: &str, text: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        if !self.config().enabled {
            return None;
        }

        let key = CacheKey::new(source_lang, text);
        let mut entries = self.lock_entries();

        let Some(mut entry) = entries.shift_remove(&key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            log::debug!("Cache miss for key: {}", key.as_str());
            return None;
        };

        if entry.is_expired_at(now) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.dirty.store(true, Ordering::Relaxed);
            log::debug!("Cache expired for key: {}", key.as_str());
            return None;
        }

        entry.last_accessed = now;
        entries.insert(key, entry.clone());
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Store a translation, evicting the least recently used entry when full
    pub fn put(&self, source_lang: &str, text: &str, translated_text: &str, engine: &str) {
        self.put_at(source_lang, text, translated_text, engine, Utc::now());
    }

    pub fn put_at(
        &self,
        source_lang: &str,
        text: &str,
        translated_text: &str,
        engine: &str,
        now: DateTime<Utc>,
    ) {
        let config = self.config();
        if !config.enabled {
            return;
        }

        let key = CacheKey::new(source_lang, text);
        let max_entries = config.max_entries.max(1);
        let mut entries = self.lock_entries();

        if entries.shift_remove(&key).is_none() && entries.len() >= max_entries {
            if let Some((evicted, _)) = entries.shift_remove_index(0) {
                log::debug!("Evicted least recently used entry: {}", evicted.as_str());
            }
        }

        entries.insert(key, CacheEntry::new(translated_text, engine, now, config.ttl));
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Apply a new TTL and size bound. Shrinking evicts from the LRU end.
    pub fn reconfigure(&self, ttl: Duration, max_entries: usize) {
        {
            let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
            config.ttl = ttl;
            config.max_entries = max_entries.max(1);
        }

        let max_entries = max_entries.max(1);
        let mut entries = self.lock_entries();
        let mut evicted = 0;
        while entries.len() > max_entries {
            entries.shift_remove_index(0);
            evicted += 1;
        }
        if evicted > 0 {
            self.dirty.store(true, Ordering::Relaxed);
            log::debug!("Evicted {} entries after cache resize", evicted);
        }
    }

    /// Remove expired entries from cache
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Utc::now())
    }

    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        let evicted = before - entries.len();
        if evicted > 0 {
            self.dirty.store(true, Ordering::Relaxed);
        }
        log::debug!("Evicted {} expired cache entries", evicted);
        evicted
    }

    /// Clear all cache entries, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut entries = self.lock_entries();
        let evicted = entries.len();
        entries.clear();
        self.dirty.store(true, Ordering::Relaxed);
        log::info!("Cache cleared ({} entries)", evicted);
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the contents changed since the last successful snapshot.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let entries = self.lock_entries();
        let total_entries = entries.len();
        let expired_entries = entries
            .values()
            .filter(|entry| entry.is_expired_at(now))
            .count();

        CacheStats {
            total_entries,
            valid_entries: total_entries - expired_entries,
            expired_entries,
            max_entries: self.config().max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn snapshot_at(&self, now: DateTime<Utc>) -> CacheSnapshot {
        let entries = self.lock_entries();
        CacheSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            entries: entries
                .iter()
                .filter(|(_, entry)| !entry.is_expired_at(now))
                .map(|(key, entry)| SnapshotEntry {
                    key: key.0.clone(),
                    entry: entry.clone(),
                })
                .collect(),
        }
    }

    fn restore_at(&self, snapshot: CacheSnapshot, now: DateTime<Utc>) -> usize {
        let max_entries = self.config().max_entries.max(1);
        let mut entries = self.lock_entries();
        let mut restored = 0;

        for SnapshotEntry { key, entry } in snapshot.entries {
            if entry.is_expired_at(now) {
                continue;
            }
            let key = CacheKey(key);
            if entries.shift_remove(&key).is_none() && entries.len() >= max_entries {
                entries.shift_remove_index(0);
            }
            entries.insert(key, entry);
            restored += 1;
        }
        restored
    }

    /// Write the live entries to durable storage, skipping expired ones
    pub async fn persist(&self, store: &dyn KeyValueStore) -> Result<usize> {
        self.persist_at(store, Utc::now()).await
    }

    pub async fn persist_at(&self, store: &dyn KeyValueStore, now: DateTime<Utc>) -> Result<usize> {
        let was_dirty = self.dirty.swap(false, Ordering::Relaxed);
        let snapshot = self.snapshot_at(now);
        let count = snapshot.entries.len();

        let value = serde_json::to_value(&snapshot)?;
        if let Err(err) = store
            .set(StoreMap::from([(SNAPSHOT_KEY.to_string(), value)]))
            .await
        {
            if was_dirty {
                self.dirty.store(true, Ordering::Relaxed);
            }
            return Err(err);
        }

        log::debug!("Persisted {} cache entries", count);
        Ok(count)
    }

    /// Load a previously persisted snapshot, skipping expired entries
    pub async fn rehydrate(&self, store: &dyn KeyValueStore) -> Result<usize> {
        self.rehydrate_at(store, Utc::now()).await
    }

    pub async fn rehydrate_at(&self, store: &dyn KeyValueStore, now: DateTime<Utc>) -> Result<usize> {
        let mut values = store.get(&[SNAPSHOT_KEY]).await?;
        let Some(value) = values.remove(SNAPSHOT_KEY) else {
            return Ok(0);
        };

        let snapshot: CacheSnapshot = serde_json::from_value(value)
            .map_err(|err| Error::storage(format!("unreadable cache snapshot: {}", err)))?;
        if snapshot.version != SNAPSHOT_VERSION {
            log::warn!(
                "Ignoring cache snapshot with unsupported version {}",
                snapshot.version
            );
            return Ok(0);
        }

        let restored = self.restore_at(snapshot, now);
        log::info!("Restored {} cache entries from snapshot", restored);
        Ok(restored)
    }

    /// Drop the persisted snapshot as well as the in-memory entries
    pub async fn clear_persisted(&self, store: &dyn KeyValueStore) -> Result<usize> {
        let evicted = self.clear();
        store.remove(&[SNAPSHOT_KEY]).await?;
        self.dirty.store(false, Ordering::Relaxed);
        Ok(evicted)
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Thread-safe wrapper for the cache
pub type SharedTranslationCache = Arc<TranslationCache>;

/// Periodically snapshot the cache while it has unsaved changes.
///
/// Storage failures are logged and retried on the next tick; the cache keeps
/// working without persistence.
pub fn spawn_snapshot_task(
    cache: SharedTranslationCache,
    store: Arc<dyn KeyValueStore>,
    every: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        log::info!("Starting cache snapshot task (interval: {:?})", every);
        let mut timer = tokio::time::interval(every);
        // The first tick completes immediately; nothing to save yet.
        timer.tick().await;

        loop {
            timer.tick().await;
            if !cache.is_dirty() {
                continue;
            }
            if let Err(err) = cache.persist(store.as_ref()).await {
                log::warn!("Cache snapshot failed, continuing without persistence: {}", err);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::testing::FlakyStore;

    fn t(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
    }

    fn small_cache(max_entries: usize) -> TranslationCache {
        TranslationCache::new(CacheConfig::new(Duration::hours(1), max_entries))
    }

    #[test]
    fn test_cache_key_generation() {
        let key1 = CacheKey::new("en", "hello");
        let key2 = CacheKey::new("en", "hello");
        assert_eq!(key1, key2);

        assert_ne!(key1, CacheKey::new("de", "hello"));
        assert_ne!(CacheKey::new("ab", "c"), CacheKey::new("a", "bc"));
    }

    #[test]
    fn test_lru_evicts_oldest_insert() {
        let cache = small_cache(2);
        cache.put_at("en", "A", "a", "api", t(0));
        cache.put_at("en", "B", "b", "api", t(1));
        cache.put_at("en", "C", "c", "api", t(2));

        assert_eq!(cache.len(), 2);
        assert!(cache.get_at("en", "A", t(3)).is_none());
        assert!(cache.get_at("en", "B", t(3)).is_some());
        assert!(cache.get_at("en", "C", t(3)).is_some());
    }

    #[test]
    fn test_access_protects_from_eviction() {
        let cache = small_cache(2);
        cache.put_at("en", "A", "a", "api", t(0));
        cache.put_at("en", "B", "b", "api", t(1));
        assert!(cache.get_at("en", "A", t(2)).is_some());
        cache.put_at("en", "C", "c", "api", t(3));

        assert!(cache.get_at("en", "A", t(4)).is_some());
        assert!(cache.get_at("en", "B", t(4)).is_none());
        assert!(cache.get_at("en", "C", t(4)).is_some());
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let cache = small_cache(2);
        cache.put_at("en", "A", "a", "api", t(0));
        cache.put_at("en", "B", "b", "api", t(0));
        cache.put_at("en", "C", "c", "api", t(0));

        assert!(cache.get_at("en", "A", t(0)).is_none());
        assert!(cache.get_at("en", "B", t(0)).is_some());
    }

    #[test]
    fn test_ttl_expiry_evicts_on_get() {
        let cache = TranslationCache::new(CacheConfig::new(Duration::milliseconds(1000), 10));
        cache.put_at("en", "hello", "こんにちは", "api", t(0));

        let hit = cache.get_at("en", "hello", t(500)).unwrap();
        assert_eq!(hit.translated_text(), "こんにちは");
        assert_eq!(hit.last_accessed(), &t(500));

        assert!(cache.get_at("en", "hello", t(1500)).is_none());
        assert_eq!(cache.len(), 0);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_put_replaces_existing_without_eviction() {
        let cache = small_cache(2);
        cache.put_at("en", "A", "a", "api", t(0));
        cache.put_at("en", "B", "b", "api", t(1));
        cache.put_at("en", "A", "a2", "api", t(2));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at("en", "A", t(3)).unwrap().translated_text(), "a2");
        assert!(cache.get_at("en", "B", t(3)).is_some());
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = TranslationCache::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        cache.put("en", "A", "a", "api");
        assert!(cache.is_empty());
        assert!(cache.get("en", "A").is_none());
    }

    #[test]
    fn test_reconfigure_shrinks_from_lru_end() {
        let cache = small_cache(3);
        cache.put_at("en", "A", "a", "api", t(0));
        cache.put_at("en", "B", "b", "api", t(1));
        cache.put_at("en", "C", "c", "api", t(2));

        cache.reconfigure(Duration::hours(1), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_at("en", "C", t(3)).is_some());
    }

    #[test]
    fn test_clear_reports_evicted_count() {
        let cache = small_cache(5);
        cache.put("en", "A", "a", "api");
        cache.put("en", "B", "b", "api");
        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_expired() {
        let cache = TranslationCache::new(CacheConfig::new(Duration::milliseconds(100), 10));
        cache.put_at("en", "A", "a", "api", t(0));
        cache.put_at("en", "B", "b", "api", t(150));
        assert_eq!(cache.evict_expired_at(t(200)), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_skips_expired_entries() {
        let store = MemoryStore::new();
        let cache = TranslationCache::new(CacheConfig::new(Duration::milliseconds(1000), 10));
        cache.put_at("en", "old", "o", "api", t(0));
        cache.put_at("en", "new", "n", "api", t(800));
        assert!(cache.is_dirty());

        assert_eq!(cache.persist_at(&store, t(1200)).await.unwrap(), 1);
        assert!(!cache.is_dirty());

        let restored = TranslationCache::new(CacheConfig::new(Duration::milliseconds(1000), 10));
        assert_eq!(restored.rehydrate_at(&store, t(1300)).await.unwrap(), 1);
        assert!(restored.get_at("en", "new", t(1300)).is_some());

        // The surviving entry itself expires before a later restart.
        let late = TranslationCache::new(CacheConfig::new(Duration::milliseconds(1000), 10));
        assert_eq!(late.rehydrate_at(&store, t(5000)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rehydrate_without_snapshot() {
        let store = MemoryStore::new();
        let cache = small_cache(10);
        assert_eq!(cache.rehydrate(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_persisted_drops_snapshot() {
        let store = MemoryStore::new();
        let cache = small_cache(10);
        cache.put("en", "A", "a", "api");
        cache.persist(&store).await.unwrap();

        assert_eq!(cache.clear_persisted(&store).await.unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_task_writes_only_dirty_state() {
        let store = Arc::new(FlakyStore::new());
        let cache = Arc::new(small_cache(10));
        let every = std::time::Duration::from_secs(10);
        let task = spawn_snapshot_task(cache.clone(), store.clone(), every);

        tokio::time::sleep(std::time::Duration::from_millis(10_100)).await;
        assert_eq!(store.writes(), 0);

        cache.put("en", "A", "a", "api");
        tokio::time::sleep(every).await;
        assert_eq!(store.writes(), 1);
        assert!(!cache.is_dirty());

        tokio::time::sleep(every * 2).await;
        assert_eq!(store.writes(), 1);

        // A failed write keeps the changes pending for the next tick.
        store.fail_next_writes(1);
        cache.put("en", "B", "b", "api");
        tokio::time::sleep(every).await;
        assert_eq!(store.writes(), 1);
        assert!(cache.is_dirty());
        assert!(!task.is_finished());

        tokio::time::sleep(every).await;
        assert_eq!(store.writes(), 2);
        assert!(!cache.is_dirty());

        let restored = small_cache(10);
        assert_eq!(restored.rehydrate(store.as_ref()).await.unwrap(), 2);
        task.abort();
    }
}
