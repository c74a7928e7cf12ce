use crate::cache::{CacheConfig, CacheStats, SharedTranslationCache, TranslationCache};
use crate::error::{Error, Result};
use crate::queue::{QueueConfig, QueueStats, RequestQueue};
use crate::settings::Settings;
use crate::translator::{SharedTranslator, Translation, CACHED_ENGINE};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct TranslationCounters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    api_calls: AtomicU64,
    errors: AtomicU64,
}

/// Cached, rate-limited access to the translate operation.
///
/// Lookups hit the cache first; misses go through the request queue, which
/// writes successful results back into the cache.
pub struct TranslationService {
    cache: SharedTranslationCache,
    queue: RequestQueue,
    counters: TranslationCounters,
}

impl TranslationService {
    pub fn new(
        translator: SharedTranslator,
        cache_config: CacheConfig,
        queue_config: QueueConfig,
    ) -> Self {
        let cache = Arc::new(TranslationCache::new(cache_config));
        let queue = RequestQueue::with_cache(translator, cache.clone(), queue_config);
        Self {
            cache,
            queue,
            counters: TranslationCounters::default(),
        }
    }

    pub fn from_settings(translator: SharedTranslator, settings: &Settings) -> Self {
        Self::new(translator, settings.cache_config(), settings.queue_config())
    }

    pub fn cache(&self) -> &SharedTranslationCache {
        &self.cache
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub async fn translate(&self, text: &str, source_lang: &str) -> Result<Translation> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::validation("nothing to translate"));
        }
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        if let Some(entry) = self.cache.get(source_lang, text) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("Returning cached translation for: {}", text);
            return Ok(Translation::new(entry.translated_text().clone(), CACHED_ENGINE));
        }

        self.counters.api_calls.fetch_add(1, Ordering::Relaxed);
        let result = self.queue.enqueue(text, source_lang).await;
        if result.is_err() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Push cache and concurrency settings down to the components.
    pub fn apply_settings(&self, settings: &Settings) {
        self.cache
            .reconfigure(settings.cache_ttl(), settings.cache_max_size);
        self.queue.set_max_concurrent(settings.max_concurrent);
    }

    pub async fn ping(&self) -> Result<()> {
        self.queue.ping().await
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            cache: self.cache.stats(),
            queue: self.queue.stats(),
            translations: TranslationStats {
                requests: self.counters.requests.load(Ordering::Relaxed),
                cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
                api_calls: self.counters.api_calls.load(Ordering::Relaxed),
                errors: self.counters.errors.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub api_calls: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub cache: CacheStats,
    pub queue: QueueStats,
    pub translations: TranslationStats,
}

pub type SharedTranslationService = Arc<TranslationService>;
