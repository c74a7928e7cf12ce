pub mod cache;
pub mod classifier;
pub mod deduplication;
mod error;
pub mod feed;
pub mod messaging;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod storage;
pub mod transition;
pub mod translator;

#[cfg(test)]
mod testing;
#[cfg(test)]
mod tests;

pub use cache::{CacheConfig, CacheStats, SharedTranslationCache, TranslationCache};
pub use classifier::{is_eligible, Thresholds, TranslationMode};
pub use deduplication::{DeduplicationStore, SharedDeduplicationStore};
pub use error::{Error, ErrorKind, Result};
pub use feed::{FeedEntry, FeedEntryRef, FeedSource, Provenance, Renderer};
pub use messaging::{BackgroundTranslator, MessageHandler, Request, Response};
pub use pipeline::IngestPipeline;
pub use queue::{QueueConfig, QueueStats, QueueStatus, RequestQueue};
pub use retry::ReconnectPolicy;
pub use scheduler::{IngestScheduler, IngestStats, SharedIngestScheduler};
pub use service::{ServiceStats, SharedTranslationService, TranslationService};
pub use settings::Settings;
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore, SharedKeyValueStore};
pub use transition::{
    ChannelTransitionTracker, SharedTransitionTracker, TransitionConfig, TransitionEvent,
    TransitionState,
};
pub use translator::{HttpTranslator, HttpTranslatorConfig, SharedTranslator, Translation, Translator};
