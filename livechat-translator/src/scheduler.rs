//! Turns observed feed entries into translation submissions.
//!
//! Entries of one batch are released one by one, `requestDelay` apart, by a
//! single release loop, so bursts are smoothed and arrival order is kept
//! across batches. Everything that can change while an entry waits (session
//! generation, grace period, settings) is read again when it is released.

use crate::classifier::is_eligible;
use crate::deduplication::SharedDeduplicationStore;
use crate::feed::{FeedEntry, FeedEntryRef, Provenance, SharedFeedSource, SharedRenderer};
use crate::service::SharedTranslationService;
use crate::settings::Settings;
use crate::transition::SharedTransitionTracker;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Release {
    entry: FeedEntryRef,
    generation: u64,
    due: Instant,
    /// Drained from the feed at attach time rather than observed arriving.
    from_snapshot: bool,
}

struct Attachment {
    releases: mpsc::UnboundedSender<Release>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[derive(Default)]
struct IngestCounters {
    released: AtomicU64,
    stale: AtomicU64,
    suppressed: AtomicU64,
    historical_dropped: AtomicU64,
    ineligible: AtomicU64,
    duplicates: AtomicU64,
    submitted: AtomicU64,
    rendered: AtomicU64,
    failed: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub released: u64,
    /// Dropped because the session moved on before release or completion
    pub stale: u64,
    /// Dropped because the grace period was running
    pub suppressed: u64,
    pub historical_dropped: u64,
    pub ineligible: u64,
    pub duplicates: u64,
    pub submitted: u64,
    pub rendered: u64,
    pub failed: u64,
}

pub struct IngestScheduler {
    tracker: SharedTransitionTracker,
    dedup: SharedDeduplicationStore,
    service: SharedTranslationService,
    renderer: SharedRenderer,
    settings: watch::Receiver<Settings>,
    attachment: Mutex<Option<Attachment>>,
    counters: IngestCounters,
}

pub type SharedIngestScheduler = Arc<IngestScheduler>;

impl IngestScheduler {
    pub fn new(
        tracker: SharedTransitionTracker,
        dedup: SharedDeduplicationStore,
        service: SharedTranslationService,
        renderer: SharedRenderer,
        settings: watch::Receiver<Settings>,
    ) -> Self {
        Self {
            tracker,
            dedup,
            service,
            renderer,
            settings,
            attachment: Mutex::new(None),
            counters: IngestCounters::default(),
        }
    }

    fn lock_attachment(&self) -> MutexGuard<'_, Option<Attachment>> {
        self.attachment.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_attached(&self) -> bool {
        self.lock_attachment().is_some()
    }

    /// Start observing `feed`. Returns `false` if the feed container is not
    /// present.
    ///
    /// Whatever the feed already shows is historical: it is drained once when
    /// historical processing is enabled, and remembered as processed otherwise.
    pub fn attach(self: &Arc<Self>, feed: SharedFeedSource) -> bool {
        if !feed.locate_container() {
            log::warn!("Feed container not found, not attaching");
            return false;
        }
        self.detach();

        let settings = self.settings.borrow().clone();
        let generation = self.tracker.current_generation();
        let (releases, release_rx) = mpsc::unbounded_channel();

        let existing = feed.current_entries();
        if settings.process_historical_on_attach {
            log::debug!("Draining {} existing entries as historical", existing.len());
            let now = Instant::now();
            for (index, entry) in existing.into_iter().enumerate() {
                let _ = releases.send(Release {
                    entry: FeedEntryRef::from_entry(entry, Provenance::Historical),
                    generation,
                    due: now + settings.request_delay() * index as u32,
                    from_snapshot: true,
                });
            }
        } else {
            for id in existing.iter().filter_map(|entry| entry.id.as_deref()) {
                self.dedup.mark_processed(id);
            }
            log::debug!("Skipping {} entries already on screen", existing.len());
        }

        let release_task = tokio::spawn(Arc::clone(self).release_loop(release_rx));
        let observer_task = {
            let scheduler = Arc::clone(self);
            let mut batches = feed.observe();
            tokio::spawn(async move {
                while let Some(batch) = batches.recv().await {
                    scheduler.on_batch(batch);
                }
                log::debug!("Feed observation ended");
            })
        };

        *self.lock_attachment() = Some(Attachment {
            releases,
            tasks: vec![release_task, observer_task],
        });
        log::info!("Attached to feed (generation {})", generation);
        true
    }

    pub fn detach(&self) {
        if self.lock_attachment().take().is_some() {
            log::info!("Detached from feed");
        }
    }

    /// Schedule a batch of newly observed entries for staggered release.
    pub fn on_batch(&self, entries: Vec<FeedEntry>) {
        let attachment = self.lock_attachment();
        let Some(attachment) = attachment.as_ref() else {
            log::debug!("Ignoring batch of {} entries while detached", entries.len());
            return;
        };

        let generation = self.tracker.current_generation();
        let delay = self.settings.borrow().request_delay();
        let now = Instant::now();
        for (index, entry) in entries.into_iter().enumerate() {
            let _ = attachment.releases.send(Release {
                entry: FeedEntryRef::from_entry(entry, Provenance::Live),
                generation,
                due: now + delay * index as u32,
                from_snapshot: false,
            });
        }
    }

    async fn release_loop(self: Arc<Self>, mut releases: mpsc::UnboundedReceiver<Release>) {
        while let Some(release) = releases.recv().await {
            tokio::time::sleep_until(release.due).await;
            self.release(release);
        }
    }

    fn release(self: &Arc<Self>, release: Release) {
        bump(&self.counters.released);
        let Release {
            mut entry,
            generation,
            from_snapshot,
            ..
        } = release;

        if self.tracker.current_generation() != generation {
            bump(&self.counters.stale);
            log::debug!("Dropping {} from stale generation {}", entry.id(), generation);
            return;
        }

        let in_grace = self.tracker.is_in_grace_period();
        entry.retag(if from_snapshot || in_grace {
            Provenance::Historical
        } else {
            Provenance::Live
        });

        if in_grace {
            bump(&self.counters.suppressed);
            log::debug!("Suppressing {} during grace period", entry.id());
            return;
        }

        let settings = self.settings.borrow().clone();
        if !settings.enabled {
            return;
        }
        if *entry.provenance() == Provenance::Historical && !settings.process_historical_on_attach {
            bump(&self.counters.historical_dropped);
            return;
        }
        if !is_eligible(entry.text(), settings.translation_mode, &settings.thresholds()) {
            bump(&self.counters.ineligible);
            return;
        }
        if !self.dedup.mark_processed(entry.id()) {
            bump(&self.counters.duplicates);
            log::debug!("Already processed {}", entry.id());
            return;
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler
                .submit(entry, generation, settings.source_language)
                .await
        });
    }

    async fn submit(&self, entry: FeedEntryRef, generation: u64, source_lang: String) {
        // Checked again here: the enqueue below happens in this same poll.
        if self.tracker.current_generation() != generation {
            bump(&self.counters.stale);
            log::debug!(
                "Dropping {} from stale generation {} before submission",
                entry.id(),
                generation
            );
            return;
        }
        if self.tracker.is_in_grace_period() {
            bump(&self.counters.suppressed);
            log::debug!("Suppressing {} during grace period", entry.id());
            return;
        }

        bump(&self.counters.submitted);
        let result = self.service.translate(entry.text(), &source_lang).await;

        if self.tracker.current_generation() != generation {
            bump(&self.counters.stale);
            log::debug!("Discarding translation of {} for stale generation", entry.id());
            return;
        }

        match result {
            Ok(translation) => {
                self.renderer.render(&entry, &translation);
                bump(&self.counters.rendered);
            }
            Err(err) => {
                bump(&self.counters.failed);
                log::debug!("No translation for {}: {}", entry.id(), err);
            }
        }
    }

    pub fn stats(&self) -> IngestStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        IngestStats {
            released: load(&self.counters.released),
            stale: load(&self.counters.stale),
            suppressed: load(&self.counters.suppressed),
            historical_dropped: load(&self.counters.historical_dropped),
            ineligible: load(&self.counters.ineligible),
            duplicates: load(&self.counters.duplicates),
            submitted: load(&self.counters.submitted),
            rendered: load(&self.counters.rendered),
            failed: load(&self.counters.failed),
        }
    }
}
