use crate::error::Result;
use crate::feed::SharedFeedSource;
use crate::queue::QueueStatus;
use crate::retry::ReconnectPolicy;
use crate::scheduler::SharedIngestScheduler;
use crate::service::SharedTranslationService;
use crate::transition::{SharedTransitionTracker, TransitionEvent, TransitionState};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Couples session transitions and queue health to the ingest scheduler.
///
/// Ingestion runs only while the tracked session is active. When the
/// translate operation reports an invalidated environment, ingestion stops
/// and the reconnect policy decides whether it comes back.
pub struct IngestPipeline {
    tracker: SharedTransitionTracker,
    scheduler: SharedIngestScheduler,
    service: SharedTranslationService,
    feed: SharedFeedSource,
    policy: ReconnectPolicy,
}

impl IngestPipeline {
    pub fn new(
        tracker: SharedTransitionTracker,
        scheduler: SharedIngestScheduler,
        service: SharedTranslationService,
        feed: SharedFeedSource,
    ) -> Self {
        Self {
            tracker,
            scheduler,
            service,
            feed,
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn scheduler(&self) -> &SharedIngestScheduler {
        &self.scheduler
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    /// Drive ingestion until the tracker goes away or reconnection gives up.
    pub async fn run(self) -> Result<()> {
        let mut events = self.tracker.subscribe();
        let mut status = self.service.queue().status();
        self.sync_with_tracker();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.on_transition(event),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Missed {} transition events, resyncing", skipped);
                        self.sync_with_tracker();
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *status.borrow_and_update() != QueueStatus::Halted {
                        continue;
                    }
                    self.recover().await?;
                    // Whatever happened meanwhile is reflected in the tracker state.
                    events = events.resubscribe();
                    self.sync_with_tracker();
                }
            }
        }

        self.scheduler.detach();
        log::info!("Ingest pipeline stopped");
        Ok(())
    }

    fn on_transition(&self, event: TransitionEvent) {
        match event {
            TransitionEvent::Started { session_id, .. } => {
                log::debug!("Pausing ingestion while switching to {}", session_id);
                self.scheduler.detach();
            }
            TransitionEvent::Activated { generation, .. } => {
                if generation == self.tracker.current_generation() {
                    self.attach();
                }
            }
            TransitionEvent::Ended { .. } => self.scheduler.detach(),
        }
    }

    fn sync_with_tracker(&self) {
        if self.tracker.state() == TransitionState::Active {
            if !self.scheduler.is_attached() {
                self.attach();
            }
        } else {
            self.scheduler.detach();
        }
    }

    /// Re-attaching snapshots the feed, so everything visible at this point
    /// counts as historical.
    fn attach(&self) {
        if !self.scheduler.attach(self.feed.clone()) {
            log::warn!("Session active but the feed is not available");
        }
    }

    async fn recover(&self) -> Result<()> {
        log::warn!("Translation backend lost, stopping ingestion");
        self.scheduler.detach();

        let service = Arc::clone(&self.service);
        let outcome = self
            .policy
            .run(|| {
                let service = Arc::clone(&service);
                async move { service.ping().await }
            })
            .await;

        match outcome {
            Ok(_) => {
                self.service.queue().resume();
                Ok(())
            }
            Err(err) => {
                let cancelled = self.service.queue().cancel_all(err.message());
                log::error!(
                    "Giving up on the translation backend, {} pending requests dropped: {}",
                    cancelled,
                    err
                );
                Err(err)
            }
        }
    }
}
