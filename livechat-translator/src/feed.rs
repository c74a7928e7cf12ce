use crate::translator::Translation;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strum_macros::Display;
use tokio::sync::mpsc;

/// An entry as reported by the host feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Host-assigned identifier, if the feed provides one.
    pub id: Option<String>,
    pub text: String,
}

impl FeedEntry {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            text: text.into(),
        }
    }

    pub fn anonymous(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
        }
    }
}

/// Whether an entry was already on screen before observation attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Historical,
    Live,
}

/// A feed entry on its way through the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[get = "pub"]
pub struct FeedEntryRef {
    id: String,
    text: String,
    provenance: Provenance,
}

static SYNTHETIC_IDS: AtomicU64 = AtomicU64::new(0);

impl FeedEntryRef {
    /// Entries without a host identifier get one derived from arrival time.
    pub fn from_entry(entry: FeedEntry, provenance: Provenance) -> Self {
        let id = entry.id.unwrap_or_else(|| {
            format!(
                "arrival-{}-{}",
                chrono::Utc::now().timestamp_millis(),
                SYNTHETIC_IDS.fetch_add(1, Ordering::Relaxed)
            )
        });
        Self {
            id,
            text: entry.text,
            provenance,
        }
    }

    pub(crate) fn retag(&mut self, provenance: Provenance) {
        self.provenance = provenance;
    }
}

/// The host's append-only feed.
///
/// How the feed is located and how text is pulled out of an entry is up to
/// the implementation; the pipeline only sees entries.
pub trait FeedSource: Send + Sync {
    /// Whether the feed container currently exists in the host.
    fn locate_container(&self) -> bool;

    /// Entries currently rendered, oldest first.
    fn current_entries(&self) -> Vec<FeedEntry>;

    /// Batches of entries appended from now on.
    fn observe(&self) -> mpsc::UnboundedReceiver<Vec<FeedEntry>>;
}

pub type SharedFeedSource = Arc<dyn FeedSource>;

/// Receives finished translations for display next to their entries.
pub trait Renderer: Send + Sync {
    fn render(&self, entry: &FeedEntryRef, translation: &Translation);
}

pub type SharedRenderer = Arc<dyn Renderer>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_id_is_kept() {
        let entry = FeedEntryRef::from_entry(FeedEntry::new("m-1", "hi"), Provenance::Live);
        assert_eq!(entry.id(), "m-1");
        assert_eq!(entry.text(), "hi");
        assert_eq!(entry.provenance(), &Provenance::Live);
    }

    #[test]
    fn test_missing_ids_are_synthesized_uniquely() {
        let a = FeedEntryRef::from_entry(FeedEntry::anonymous("x"), Provenance::Live);
        let b = FeedEntryRef::from_entry(FeedEntry::anonymous("x"), Provenance::Live);
        assert!(a.id().starts_with("arrival-"));
        assert_ne!(a.id(), b.id());
    }
}
