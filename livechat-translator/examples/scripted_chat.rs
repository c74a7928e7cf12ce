use async_trait::async_trait;
use livechat_translator::{
    ChannelTransitionTracker, DeduplicationStore, FeedEntry, FeedEntryRef, FeedSource,
    IngestPipeline, IngestScheduler, Renderer, Settings, Translation, TranslationService,
    Translator, TransitionConfig,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Pretends to translate by tagging the text with the target language.
struct TaggingTranslator;

#[async_trait]
impl Translator for TaggingTranslator {
    async fn translate(&self, text: &str, _source_lang: &str) -> livechat_translator::Result<Translation> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        Ok(Translation::new(format!("[ja] {}", text), "demo"))
    }
}

#[derive(Default)]
struct DemoFeed {
    entries: Mutex<Vec<FeedEntry>>,
    observers: Mutex<Vec<mpsc::UnboundedSender<Vec<FeedEntry>>>>,
}

impl DemoFeed {
    fn push(&self, batch: Vec<FeedEntry>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.extend(batch.iter().cloned());
        }
        if let Ok(mut observers) = self.observers.lock() {
            observers.retain(|observer| observer.send(batch.clone()).is_ok());
        }
    }
}

impl FeedSource for DemoFeed {
    fn locate_container(&self) -> bool {
        true
    }

    fn current_entries(&self) -> Vec<FeedEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn observe(&self) -> mpsc::UnboundedReceiver<Vec<FeedEntry>> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut observers) = self.observers.lock() {
            observers.push(tx);
        }
        rx
    }
}

struct PrintRenderer;

impl Renderer for PrintRenderer {
    fn render(&self, entry: &FeedEntryRef, translation: &Translation) {
        println!(
            "   💬 {} ({}) {:?} -> {:?} [{}]",
            entry.id(),
            entry.provenance(),
            entry.text(),
            translation.translated_text,
            translation.engine
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("🚀 Scripted live chat through the ingestion pipeline");

    let settings = Settings {
        grace_period_ms: 1000,
        ..Settings::default()
    };
    let (_settings_tx, settings_rx) = watch::channel(settings.clone());

    let dedup = Arc::new(DeduplicationStore::new());
    let tracker = Arc::new(ChannelTransitionTracker::new(
        dedup.clone(),
        TransitionConfig {
            grace_period: settings.grace_period(),
            ..TransitionConfig::default()
        },
    ));
    let service = Arc::new(TranslationService::from_settings(
        Arc::new(TaggingTranslator),
        &settings,
    ));
    let feed = Arc::new(DemoFeed::default());
    let scheduler = Arc::new(IngestScheduler::new(
        tracker.clone(),
        dedup,
        service.clone(),
        Arc::new(PrintRenderer),
        settings_rx,
    ));
    let pipeline = IngestPipeline::new(tracker.clone(), scheduler.clone(), service.clone(), feed.clone()).spawn();

    feed.push(vec![FeedEntry::new("old-1", "this was here before")]);

    println!("\n1️⃣ Navigating to a channel (grace period {}ms)...", settings.grace_period_ms);
    tracker.on_navigation("https://www.twitch.tv/", "https://www.twitch.tv/somestreamer");
    tokio::time::sleep(Duration::from_millis(300)).await;
    feed.push(vec![FeedEntry::new("early-1", "sent during the grace period")]);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    println!("2️⃣ Session is {}; chat is flowing...", tracker.state());
    feed.push(vec![
        FeedEntry::new("m-1", "hello everyone"),
        FeedEntry::new("m-2", "こんにちは"),
        FeedEntry::new("m-3", "GG"),
        FeedEntry::new("m-4", "what a play that was"),
    ]);
    tokio::time::sleep(Duration::from_millis(800)).await;

    println!("3️⃣ Repeating a line (should be served from cache)...");
    feed.push(vec![
        FeedEntry::anonymous("hello everyone"),
        FeedEntry::new("m-1", "hello everyone"),
    ]);
    tokio::time::sleep(Duration::from_millis(500)).await;

    println!("\n📊 Ingest stats: {}", serde_json::to_string_pretty(&scheduler.stats())?);
    println!("📊 Service stats: {}", serde_json::to_string_pretty(&service.stats())?);

    pipeline.abort();
    println!("\n✅ Done");
    Ok(())
}
