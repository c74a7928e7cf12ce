use crate::cache::CacheConfig;
use crate::classifier::{Thresholds, TranslationMode};
use crate::error::Result;
use crate::queue::QueueConfig;
use crate::storage::{KeyValueStore, StoreMap};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage key the settings object lives under.
pub const SETTINGS_KEY: &str = "settings";

/// User-facing configuration shared by the ingestion side and the
/// background process.
///
/// Out-of-range values are never an error: [`Settings::sanitized`] clamps
/// them back into range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub enabled: bool,
    pub translation_mode: TranslationMode,
    /// Percent of native-script characters at which a line is left alone
    pub native_threshold: f64,
    /// Percent of foreign-script characters at which a line is translated
    pub foreign_threshold: f64,
    /// Percent of foreign-script characters required in `targetScriptOnly` mode
    pub target_script_threshold: f64,
    /// Delay between releases of entries within one batch
    pub request_delay_ms: u64,
    pub max_concurrent: usize,
    pub cache_ttl_hours: u64,
    pub cache_max_size: usize,
    pub process_historical_on_attach: bool,
    pub grace_period_ms: u64,
    pub source_language: String,
    pub target_language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            translation_mode: TranslationMode::Selective,
            native_threshold: 30.0,
            foreign_threshold: 50.0,
            target_script_threshold: 50.0,
            request_delay_ms: 100,
            max_concurrent: 3,
            cache_ttl_hours: 24,
            cache_max_size: 1000,
            process_historical_on_attach: false,
            grace_period_ms: 5000,
            source_language: "auto".to_string(),
            target_language: "ja".to_string(),
        }
    }
}

fn clamp_percent(name: &str, value: f64, default: f64) -> f64 {
    if value.is_nan() {
        log::debug!("{} is not a number, using {}", name, default);
        return default;
    }
    let clamped = value.clamp(0.0, 100.0);
    if clamped != value {
        log::debug!("{} out of range ({}), clamped to {}", name, value, clamped);
    }
    clamped
}

fn clamp_int<T>(name: &str, value: T, min: T, max: T) -> T
where
    T: Ord + Copy + std::fmt::Display,
{
    let clamped = value.clamp(min, max);
    if clamped != value {
        log::debug!("{} out of range ({}), clamped to {}", name, value, clamped);
    }
    clamped
}

impl Settings {
    /// Clamp every field into its valid range, falling back to defaults for
    /// values that cannot be repaired.
    pub fn sanitized(self) -> Self {
        let defaults = Settings::default();
        let language = |value: String, default: String| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                default
            } else {
                trimmed.to_string()
            }
        };

        Self {
            enabled: self.enabled,
            translation_mode: self.translation_mode,
            native_threshold: clamp_percent(
                "nativeThreshold",
                self.native_threshold,
                defaults.native_threshold,
            ),
            foreign_threshold: clamp_percent(
                "foreignThreshold",
                self.foreign_threshold,
                defaults.foreign_threshold,
            ),
            target_script_threshold: clamp_percent(
                "targetScriptThreshold",
                self.target_script_threshold,
                defaults.target_script_threshold,
            ),
            request_delay_ms: clamp_int("requestDelayMs", self.request_delay_ms, 0, 10_000),
            max_concurrent: clamp_int("maxConcurrent", self.max_concurrent, 1, 10),
            cache_ttl_hours: clamp_int("cacheTtlHours", self.cache_ttl_hours, 1, 24 * 30),
            cache_max_size: clamp_int("cacheMaxSize", self.cache_max_size, 10, 100_000),
            process_historical_on_attach: self.process_historical_on_attach,
            grace_period_ms: clamp_int("gracePeriodMs", self.grace_period_ms, 0, 60_000),
            source_language: language(self.source_language, defaults.source_language),
            target_language: language(self.target_language, defaults.target_language),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            native: self.native_threshold,
            foreign: self.foreign_threshold,
            target_script: self.target_script_threshold,
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cache_ttl_hours as i64)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(self.cache_ttl(), self.cache_max_size)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_concurrent: self.max_concurrent,
            ..QueueConfig::default()
        }
    }

    /// Parse an arbitrary JSON payload, repairing what can be repaired.
    pub fn from_value(value: serde_json::Value) -> Self {
        match serde_json::from_value::<Settings>(value) {
            Ok(settings) => settings.sanitized(),
            Err(err) => {
                log::warn!("Malformed settings, using defaults: {}", err);
                Settings::default()
            }
        }
    }

    /// Load settings from durable storage.
    ///
    /// Missing or unreadable settings yield the defaults; storage failures are
    /// logged rather than propagated.
    pub async fn load(store: &dyn KeyValueStore) -> Self {
        match store.get(&[SETTINGS_KEY]).await {
            Ok(mut values) => values
                .remove(SETTINGS_KEY)
                .map(Settings::from_value)
                .unwrap_or_default(),
            Err(err) => {
                log::warn!("Could not load settings, using defaults: {}", err);
                Settings::default()
            }
        }
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        let value = serde_json::to_value(self)?;
        store
            .set(StoreMap::from([(SETTINGS_KEY.to_string(), value)]))
            .await
    }
}
