use crate::config::Config;
use getset::Getters;
use livechat_translator::cache::spawn_snapshot_task;
use livechat_translator::{
    HttpTranslator, HttpTranslatorConfig, JsonFileStore, MessageHandler, Settings,
    SharedKeyValueStore, SharedTranslationService, TranslationService,
};
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Getters)]
pub struct Context {
    service: SharedTranslationService,
    store: SharedKeyValueStore,
    #[get = "pub"]
    handler: MessageHandler,
    snapshot_task: JoinHandle<()>,
}

impl Context {
    pub async fn new(config: Config) -> Self {
        let store: SharedKeyValueStore = Arc::new(JsonFileStore::new(config.store_path()));
        let settings = Settings::load(store.as_ref()).await;

        let translator = HttpTranslator::new(HttpTranslatorConfig {
            endpoint: config.translator().endpoint().clone(),
            api_key: config.translator().api_key().clone(),
            target_language: settings.target_language.clone(),
            engine: config.translator().engine().clone(),
        });
        let service = Arc::new(TranslationService::from_settings(
            Arc::new(translator),
            &settings,
        ));

        match service.cache().rehydrate(store.as_ref()).await {
            Ok(restored) => info!("Restored {} cached translations", restored),
            Err(err) => warn!("Starting with an empty cache: {}", err),
        }
        let snapshot_task = spawn_snapshot_task(
            service.cache().clone(),
            store.clone(),
            config.snapshot_interval(),
        );

        info!(
            "Initialized translation service (TTL: {}h, max entries: {}, max concurrent: {})",
            settings.cache_ttl_hours, settings.cache_max_size, settings.max_concurrent
        );

        let (settings, _) = watch::channel(settings);
        let handler = MessageHandler::new(service.clone(), store.clone(), settings);

        Self {
            service,
            store,
            handler,
            snapshot_task,
        }
    }

    /// Write the cache out one last time.
    pub async fn flush(&self) {
        self.snapshot_task.abort();
        match self.service.cache().persist(self.store.as_ref()).await {
            Ok(saved) => info!("Saved {} cached translations", saved),
            Err(err) => warn!("Could not save the cache on shutdown: {}", err),
        }
    }
}

pub type ContextPointer = Arc<Context>;
