use crate::deduplication::DeduplicationStore;
use crate::error::ErrorKind;
use crate::feed::{FeedEntry, Provenance};
use crate::messaging::{MessageHandler, Request};
use crate::pipeline::IngestPipeline;
use crate::retry::ReconnectPolicy;
use crate::scheduler::{IngestScheduler, SharedIngestScheduler};
use crate::service::{SharedTranslationService, TranslationService};
use crate::settings::Settings;
use crate::storage::MemoryStore;
use crate::testing::{MockTranslator, RecordingRenderer, ScriptedFeed};
use crate::transition::{ChannelTransitionTracker, SharedTransitionTracker, TransitionConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const CHANNEL: &str = "https://www.twitch.tv/streamer";
const OTHER_CHANNEL: &str = "https://www.twitch.tv/other";

struct World {
    tracker: SharedTransitionTracker,
    scheduler: SharedIngestScheduler,
    service: SharedTranslationService,
    translator: Arc<MockTranslator>,
    renderer: Arc<RecordingRenderer>,
    feed: Arc<ScriptedFeed>,
    handler: MessageHandler,
}

fn world(translator: MockTranslator, existing: Vec<FeedEntry>) -> (World, IngestPipeline) {
    let settings = Settings::default();
    let (settings_tx, settings_rx) = watch::channel(settings.clone());

    let dedup = Arc::new(DeduplicationStore::new());
    let tracker = Arc::new(ChannelTransitionTracker::new(
        dedup.clone(),
        TransitionConfig::default(),
    ));
    let translator = Arc::new(translator);
    let service = Arc::new(TranslationService::from_settings(
        translator.clone(),
        &settings,
    ));
    let renderer = Arc::new(RecordingRenderer::default());
    let feed = Arc::new(ScriptedFeed::new(existing));
    let scheduler = Arc::new(IngestScheduler::new(
        tracker.clone(),
        dedup,
        service.clone(),
        renderer.clone(),
        settings_rx,
    ));
    let pipeline = IngestPipeline::new(
        tracker.clone(),
        scheduler.clone(),
        service.clone(),
        feed.clone(),
    );
    let handler = MessageHandler::new(service.clone(), Arc::new(MemoryStore::new()), settings_tx)
        .with_tracker(tracker.clone());

    (
        World {
            tracker,
            scheduler,
            service,
            translator,
            renderer,
            feed,
            handler,
        },
        pipeline,
    )
}

async fn advance_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_translates_live_chat_after_grace() {
    let (w, pipeline) = world(
        MockTranslator::echo(),
        vec![FeedEntry::new("old", "said before we arrived")],
    );
    let _pipeline = pipeline.spawn();
    advance_ms(10).await;

    w.tracker.on_navigation("https://www.twitch.tv/", CHANNEL);
    advance_ms(1000).await;
    assert!(!w.scheduler.is_attached());

    advance_ms(5000).await;
    assert!(w.scheduler.is_attached());

    w.feed.append(vec![
        FeedEntry::new("m-1", "hello there"),
        FeedEntry::new("m-2", "おはよう"),
    ]);
    advance_ms(300).await;
    w.feed.append(vec![FeedEntry::new("m-3", "hello there")]);
    advance_ms(100).await;

    assert_eq!(w.translator.seen(), vec!["hello there"]);
    assert_eq!(
        w.renderer.rendered(),
        vec![
            (
                "m-1".to_string(),
                Provenance::Live,
                "[ja] hello there".to_string()
            ),
            (
                "m-3".to_string(),
                Provenance::Live,
                "[ja] hello there".to_string()
            ),
        ]
    );
    let stats = w.service.stats();
    assert_eq!(stats.translations.cache_hits, 1);
    assert_eq!(w.scheduler.stats().ineligible, 1);
}

#[tokio::test(start_paused = true)]
async fn test_switching_channels_restarts_ingestion() {
    let (w, pipeline) = world(MockTranslator::echo(), Vec::new());
    let _pipeline = pipeline.spawn();
    advance_ms(10).await;
    w.tracker.on_navigation("", CHANNEL);
    advance_ms(6000).await;

    w.feed.append(vec![FeedEntry::new("m-1", "hello there")]);
    advance_ms(10).await;

    w.tracker.on_navigation(CHANNEL, OTHER_CHANNEL);
    advance_ms(10).await;
    assert!(!w.scheduler.is_attached());

    // Still on screen when the new session activates, so it is historical.
    w.feed.append(vec![FeedEntry::new("m-2", "good evening")]);
    advance_ms(6000).await;
    assert!(w.scheduler.is_attached());

    w.feed.append(vec![FeedEntry::new("m-3", "hello there")]);
    advance_ms(10).await;

    assert_eq!(w.renderer.ids(), vec!["m-1", "m-3"]);
    assert_eq!(w.translator.seen(), vec!["hello there"]);
}

#[tokio::test(start_paused = true)]
async fn test_leaving_the_session_stops_ingestion() {
    let (w, pipeline) = world(MockTranslator::echo(), Vec::new());
    let _pipeline = pipeline.spawn();
    advance_ms(10).await;
    w.tracker.on_navigation("", CHANNEL);
    advance_ms(6000).await;
    assert!(w.scheduler.is_attached());

    w.tracker
        .on_navigation(CHANNEL, "https://www.twitch.tv/directory/following");
    advance_ms(10).await;
    assert!(!w.scheduler.is_attached());

    w.feed.append(vec![FeedEntry::new("m-1", "hello there")]);
    advance_ms(100).await;
    assert_eq!(w.translator.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lost_backend_is_reconnected() {
    let translator = MockTranslator::echo()
        .fail_on("boom town", ErrorKind::EnvironmentInvalidated)
        .with_ping_failures(1);
    let (w, pipeline) = world(translator, Vec::new());
    let _pipeline = pipeline.spawn();
    advance_ms(10).await;
    w.tracker.on_navigation("", CHANNEL);
    advance_ms(6000).await;

    w.feed.append(vec![FeedEntry::new("m-1", "boom town")]);
    advance_ms(10).await;
    assert!(w.service.queue().is_halted());
    assert!(!w.scheduler.is_attached());

    // One failed probe after 1s, a successful one 2s later.
    advance_ms(3100).await;
    assert!(!w.service.queue().is_halted());
    assert!(w.scheduler.is_attached());
    assert_eq!(w.translator.pings(), 2);

    w.feed.append(vec![FeedEntry::new("m-2", "hello again")]);
    advance_ms(10).await;
    assert_eq!(w.renderer.ids(), vec!["m-2"]);
    assert_eq!(w.scheduler.stats().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_and_cancels_pending_work() {
    let translator = MockTranslator::echo()
        .fail_on("boom town", ErrorKind::EnvironmentInvalidated)
        .with_ping_failures(100);
    let (w, pipeline) = world(translator, Vec::new());
    let pipeline = pipeline
        .with_policy(ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::default()
        })
        .spawn();
    advance_ms(10).await;
    w.tracker.on_navigation("", CHANNEL);
    advance_ms(6000).await;

    w.feed.append(vec![FeedEntry::new("m-1", "boom town")]);
    advance_ms(10).await;
    let stranded = w.service.queue().enqueue("queued while halted", "en");

    advance_ms(3100).await;
    let err = pipeline.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EnvironmentInvalidated);
    assert_eq!(stranded.await.unwrap_err().kind(), ErrorKind::Cancelled);
    assert!(!w.scheduler.is_attached());
}

#[tokio::test(start_paused = true)]
async fn test_settings_update_reaches_the_scheduler() {
    let (w, pipeline) = world(MockTranslator::echo(), Vec::new());
    let _pipeline = pipeline.spawn();
    advance_ms(10).await;
    w.tracker.on_navigation("", CHANNEL);
    advance_ms(6000).await;

    let response = w
        .handler
        .handle(Request::SettingsUpdated {
            settings: json!({"translationMode": "all", "enabled": true}),
        })
        .await;
    assert!(response.success);

    w.feed.append(vec![FeedEntry::new("m-1", "こんにちは")]);
    advance_ms(10).await;
    assert_eq!(w.translator.calls(), 1);

    w.handler
        .handle(Request::SettingsUpdated {
            settings: json!({"enabled": false}),
        })
        .await;
    w.feed.append(vec![FeedEntry::new("m-2", "hello there")]);
    advance_ms(10).await;
    assert_eq!(w.translator.calls(), 1);
}
