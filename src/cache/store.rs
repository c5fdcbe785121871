use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use time::OffsetDateTime;
use tracing::debug;

use crate::domain::{CacheEntry, DocumentId};
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "livemark_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "livemark_cache_miss_total";
pub(crate) const METRIC_CACHE_EVICT: &str = "livemark_cache_evict_total";

/// Latest rendered fragment per document.
///
/// The map lock is held only for the insert/lookup itself; renders happen
/// outside of it, so a slow render never blocks readers of other documents.
/// Entries are replaced whole, readers see either the old or the new one.
#[derive(Default)]
pub struct RenderCache {
    entries: RwLock<HashMap<DocumentId, CacheEntry>>,
    revision: AtomicU64,
}

impl RenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: DocumentId) -> Option<CacheEntry> {
        let entry = rw_read(&self.entries, SOURCE, "get").get(&id).cloned();
        if entry.is_some() {
            counter!(METRIC_CACHE_HIT).increment(1);
        } else {
            counter!(METRIC_CACHE_MISS).increment(1);
        }
        entry
    }

    /// Overwrite the entry for `id`; last writer wins.
    pub fn put(&self, id: DocumentId, html: impl Into<Arc<str>>) -> CacheEntry {
        let html = html.into();
        let mut entries = rw_write(&self.entries, SOURCE, "put");
        let entry = CacheEntry {
            id,
            html,
            rendered_at: OffsetDateTime::now_utc(),
            revision: self.revision.fetch_add(1, Ordering::SeqCst) + 1,
        };
        entries.insert(id, entry.clone());
        entry
    }

    /// Drop every entry whose id is not in `keep`. Returns how many were removed.
    pub fn evict(&self, keep: &HashSet<DocumentId>) -> usize {
        let removed = {
            let mut entries = rw_write(&self.entries, SOURCE, "evict");
            let before = entries.len();
            entries.retain(|id, _| keep.contains(id));
            before - entries.len()
        };
        self.record_eviction("evict", removed);
        removed
    }

    /// Drop the entry for `id`, if any.
    pub fn remove(&self, id: DocumentId) -> bool {
        let removed = rw_write(&self.entries, SOURCE, "remove")
            .remove(&id)
            .is_some();
        self.record_eviction("remove", usize::from(removed));
        removed
    }

    pub fn clear_all(&self) -> usize {
        let removed = {
            let mut entries = rw_write(&self.entries, SOURCE, "clear_all");
            let removed = entries.len();
            entries.clear();
            removed
        };
        self.record_eviction("clear_all", removed);
        removed
    }

    pub fn contains(&self, id: DocumentId) -> bool {
        rw_read(&self.entries, SOURCE, "contains").contains_key(&id)
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record_eviction(&self, op: &'static str, removed: usize) {
        if removed > 0 {
            counter!(METRIC_CACHE_EVICT).increment(removed as u64);
        }
        debug!(
            target = "livemark::cache",
            op,
            removed,
            "Render cache entries evicted"
        );
    }
}
