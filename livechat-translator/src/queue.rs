use crate::cache::SharedTranslationCache;
use crate::error::{Error, Result};
use crate::translator::{SharedTranslator, Translation};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

/// Configuration for the request queue
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Upper bound on outstanding translate calls
    pub max_concurrent: usize,
    /// Spacing between successive dispatches within one drain cycle
    pub dispatch_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            dispatch_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueStatus {
    Running,
    /// The translate operation reported an invalidated environment; nothing
    /// is dispatched until `resume` is called.
    Halted,
}

struct QueueItem {
    text: String,
    source_lang: String,
    responder: oneshot::Sender<Result<Translation>>,
}

struct QueueState {
    pending: VecDeque<QueueItem>,
    in_flight: usize,
    peak_in_flight: usize,
    max_concurrent: usize,
    halted: bool,
    next_slot: Instant,
}

struct QueueInner {
    translator: SharedTranslator,
    cache: Option<SharedTranslationCache>,
    state: Mutex<QueueState>,
    dispatch_delay: Duration,
    status: watch::Sender<QueueStatus>,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Bounded-concurrency dispatcher in front of the translate operation.
///
/// The pending list is unbounded; at most `max_concurrent` calls are ever
/// outstanding. A failed item only fails its own caller.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    pub fn new(translator: SharedTranslator, config: QueueConfig) -> Self {
        Self::build(translator, None, config)
    }

    /// Successful results are written back into `cache`.
    pub fn with_cache(
        translator: SharedTranslator,
        cache: SharedTranslationCache,
        config: QueueConfig,
    ) -> Self {
        Self::build(translator, Some(cache), config)
    }

    fn build(
        translator: SharedTranslator,
        cache: Option<SharedTranslationCache>,
        config: QueueConfig,
    ) -> Self {
        let (status, _) = watch::channel(QueueStatus::Running);
        Self {
            inner: Arc::new(QueueInner {
                translator,
                cache,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    in_flight: 0,
                    peak_in_flight: 0,
                    max_concurrent: config.max_concurrent.max(1),
                    halted: false,
                    next_slot: Instant::now(),
                }),
                dispatch_delay: config.dispatch_delay,
                status,
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Queue `text` for translation.
    ///
    /// The item is registered immediately; the returned future resolves once
    /// the item settles or is cancelled.
    pub fn enqueue(
        &self,
        text: impl Into<String>,
        source_lang: impl Into<String>,
    ) -> impl Future<Output = Result<Translation>> + Send + 'static {
        let (responder, receiver) = oneshot::channel();
        self.inner.lock_state().pending.push_back(QueueItem {
            text: text.into(),
            source_lang: source_lang.into(),
            responder,
        });
        self.inner.drain();

        async move {
            receiver
                .await
                .unwrap_or_else(|_| Err(Error::cancelled("request queue dropped the item")))
        }
    }

    /// Reject every item that has not been dispatched yet.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let cancelled: Vec<QueueItem> = self.inner.lock_state().pending.drain(..).collect();
        let count = cancelled.len();
        for item in cancelled {
            let _ = item.responder.send(Err(Error::cancelled(reason)));
        }
        if count > 0 {
            log::info!("Cancelled {} pending translation requests: {}", count, reason);
        }
        count
    }

    /// Leave the halted state and continue draining.
    pub fn resume(&self) {
        {
            let mut state = self.inner.lock_state();
            if !state.halted {
                return;
            }
            state.halted = false;
        }
        self.inner.status.send_replace(QueueStatus::Running);
        log::info!("Request queue resumed");
        self.inner.drain();
    }

    /// Change the concurrency limit for dispatches from now on.
    ///
    /// Calls already in flight are left running, so after lowering the limit
    /// the outstanding count only falls to it as those calls settle.
    pub fn set_max_concurrent(&self, max_concurrent: usize) {
        self.inner.lock_state().max_concurrent = max_concurrent.max(1);
        self.inner.drain();
    }

    pub fn status(&self) -> watch::Receiver<QueueStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_halted(&self) -> bool {
        self.inner.lock_state().halted
    }

    /// Probe the translate operation without queueing anything.
    pub async fn ping(&self) -> Result<()> {
        self.inner.translator.ping().await
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.lock_state();
        QueueStats {
            pending: state.pending.len(),
            in_flight: state.in_flight,
            peak_in_flight: state.peak_in_flight,
            max_concurrent: state.max_concurrent,
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            halted: state.halted,
        }
    }
}

/// One occupied concurrency slot, given back when dropped.
///
/// Owned by the dispatch task, so the slot is also returned when the task
/// panics or is aborted.
struct InFlightSlot {
    inner: Arc<QueueInner>,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.inner.lock_state().in_flight -= 1;
        if tokio::runtime::Handle::try_current().is_ok() {
            self.inner.drain();
        }
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain(self: &Arc<Self>) {
        let now = Instant::now();
        let mut batch = Vec::new();
        {
            let mut state = self.lock_state();
            while !state.halted && state.in_flight < state.max_concurrent {
                let Some(item) = state.pending.pop_front() else {
                    break;
                };
                state.in_flight += 1;
                state.peak_in_flight = state.peak_in_flight.max(state.in_flight);

                // Successive dispatches are spaced by `dispatch_delay`.
                let slot = state.next_slot.max(now);
                state.next_slot = slot + self.dispatch_delay;
                batch.push((item, slot - now));
            }
        }

        for (item, delay) in batch {
            let in_flight = InFlightSlot {
                inner: Arc::clone(self),
            };
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.dispatch(item, delay, in_flight).await });
        }
    }

    async fn dispatch(self: Arc<Self>, item: QueueItem, delay: Duration, in_flight: InFlightSlot) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
            let mut state = self.lock_state();
            if state.halted {
                state.pending.push_front(item);
                drop(state);
                drop(in_flight);
                return;
            }
        }

        let result = self
            .translator
            .translate(&item.text, &item.source_lang)
            .await;

        match &result {
            Ok(translation) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                if let Some(cache) = &self.cache {
                    cache.put(
                        &item.source_lang,
                        &item.text,
                        &translation.translated_text,
                        &translation.engine,
                    );
                }
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                if err.is_environment_invalidated() {
                    self.halt(err);
                } else {
                    log::debug!("Translation failed: {}", err);
                }
            }
        }

        // The caller may have stopped waiting.
        let _ = item.responder.send(result);
        drop(in_flight);
    }

    fn halt(&self, err: &Error) {
        {
            let mut state = self.lock_state();
            if state.halted {
                return;
            }
            state.halted = true;
        }
        log::warn!("Request queue halted: {}", err);
        self.status.send_replace(QueueStatus::Halted);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub max_concurrent: usize,
    pub completed: u64,
    pub failed: u64,
    pub halted: bool,
}
