//! Collaborator doubles shared by the unit tests.

use crate::error::{Error, ErrorKind, Result};
use crate::feed::{FeedEntry, FeedEntryRef, FeedSource, Provenance, Renderer};
use crate::storage::{KeyValueStore, MemoryStore, StoreMap};
use crate::translator::{Translation, Translator};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Translator that prefixes text with `[ja] `, optionally failing, stalling,
/// panicking or hanging forever.
#[derive(Default)]
pub(crate) struct MockTranslator {
    calls: AtomicUsize,
    pings: AtomicUsize,
    seen: Mutex<Vec<String>>,
    failures: HashMap<String, ErrorKind>,
    panics: Vec<String>,
    hang: bool,
    latency: Duration,
    ping_failures: AtomicUsize,
}

impl MockTranslator {
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fail_on(mut self, text: &str, kind: ErrorKind) -> Self {
        self.failures.insert(text.to_string(), kind);
        self
    }

    pub fn panic_on(mut self, text: &str) -> Self {
        self.panics.push(text.to_string());
        self
    }

    /// The first `count` pings fail with an invalidated environment.
    pub fn with_ping_failures(self, count: usize) -> Self {
        self.ping_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(&self, text: &str, _source_lang: &str) -> Result<Translation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(text.to_string());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.panics.iter().any(|panicking| panicking == text) {
            panic!("scripted panic for {}", text);
        }
        if let Some(kind) = self.failures.get(text) {
            return Err(Error::new(*kind, format!("scripted failure for {}", text)));
        }
        if self.hang {
            futures::future::pending::<()>().await;
        }
        Ok(Translation::new(format!("[ja] {}", text), "mock"))
    }

    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let remaining = self.ping_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.ping_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::environment_invalidated("background unreachable"));
        }
        Ok(())
    }
}

/// Feed whose contents the test appends to by hand.
pub(crate) struct ScriptedFeed {
    entries: Mutex<Vec<FeedEntry>>,
    observers: Mutex<Vec<mpsc::UnboundedSender<Vec<FeedEntry>>>>,
    present: AtomicBool,
}

impl ScriptedFeed {
    pub fn new(initial: Vec<FeedEntry>) -> Self {
        Self {
            entries: Mutex::new(initial),
            observers: Mutex::new(Vec::new()),
            present: AtomicBool::new(true),
        }
    }

    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    pub fn append(&self, batch: Vec<FeedEntry>) {
        self.entries.lock().unwrap().extend(batch.iter().cloned());
        self.observers
            .lock()
            .unwrap()
            .retain(|observer| observer.send(batch.clone()).is_ok());
    }
}

impl FeedSource for ScriptedFeed {
    fn locate_container(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    fn current_entries(&self) -> Vec<FeedEntry> {
        self.entries.lock().unwrap().clone()
    }

    fn observe(&self) -> mpsc::UnboundedReceiver<Vec<FeedEntry>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().unwrap().push(tx);
        rx
    }
}

#[derive(Default)]
pub(crate) struct RecordingRenderer {
    rendered: Mutex<Vec<(String, Provenance, String)>>,
}

impl RecordingRenderer {
    /// `(entry id, provenance, translated text)` in render order.
    pub fn rendered(&self) -> Vec<(String, Provenance, String)> {
        self.rendered.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.rendered().into_iter().map(|(id, _, _)| id).collect()
    }
}

impl Renderer for RecordingRenderer {
    fn render(&self, entry: &FeedEntryRef, translation: &Translation) {
        self.rendered.lock().unwrap().push((
            entry.id().clone(),
            *entry.provenance(),
            translation.translated_text.clone(),
        ));
    }
}

/// Memory store that counts writes and can be told to fail.
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    writes: AtomicUsize,
    failing_writes: AtomicUsize,
    failing_reads: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` calls to `set`.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn fail_reads(&self) {
        self.failing_reads.store(true, Ordering::SeqCst);
    }

    /// Successful `set` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, keys: &[&str]) -> Result<StoreMap> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(Error::storage("scripted read failure"));
        }
        self.inner.get(keys).await
    }

    async fn set(&self, values: StoreMap) -> Result<()> {
        let remaining = self.failing_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::storage("scripted write failure"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(values).await
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        self.inner.remove(keys).await
    }
}
