use dashmap::DashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Remembers which feed entries were already submitted in the current session.
///
/// There is no size bound: the set lives only as long as one session and is
/// emptied wholesale by the transition tracker on every channel change.
#[derive(Default)]
pub struct DeduplicationStore {
    processed: DashSet<String>,
    resets: AtomicU64,
}

impl DeduplicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_processed(&self, id: &str) -> bool {
        self.processed.contains(id)
    }

    /// Record `id`, returning `false` if it was already recorded.
    pub fn mark_processed(&self, id: &str) -> bool {
        self.processed.insert(id.to_string())
    }

    pub(crate) fn reset(&self) {
        let cleared = self.processed.len();
        self.processed.clear();
        self.resets.fetch_add(1, Ordering::Relaxed);
        log::debug!("Deduplication store cleared ({} ids)", cleared);
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    pub fn stats(&self) -> DeduplicationStats {
        DeduplicationStats {
            processed_ids: self.processed.len(),
            resets: self.resets.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for entry deduplication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeduplicationStats {
    pub processed_ids: usize,
    pub resets: u64,
}

/// Thread-safe wrapper for the deduplication store
pub type SharedDeduplicationStore = Arc<DeduplicationStore>;
