//! Polls opened files and reports on-disk changes as saves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, warn};

use crate::application::lifecycle::PreviewCoordinator;
use crate::domain::DocumentId;
use crate::infra::documents::InMemoryDocuments;

/// Last seen modification time per document.
#[derive(Debug, Default)]
struct MtimeTracker {
    seen: HashMap<DocumentId, SystemTime>,
}

impl MtimeTracker {
    /// Record `mtime`; `true` when it differs from a previously seen value.
    fn observe(&mut self, id: DocumentId, mtime: SystemTime) -> bool {
        match self.seen.insert(id, mtime) {
            Some(previous) => previous != mtime,
            None => false,
        }
    }

    fn retain(&mut self, open: &HashSet<DocumentId>) {
        self.seen.retain(|id, _| open.contains(id));
    }
}

/// Start polling every `period`. Abort the handle to stop.
pub fn spawn_file_watcher(
    documents: Arc<InMemoryDocuments>,
    coordinator: Arc<PreviewCoordinator>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tracker = MtimeTracker::default();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let files = documents.paths();
            let open = files.iter().map(|(id, _)| *id).collect::<HashSet<_>>();
            tracker.retain(&open);

            for (id, path) in files {
                let mtime = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                    Ok(mtime) => mtime,
                    Err(err) => {
                        debug!(
                            target = "livemark::watch",
                            document_id = %id,
                            path = %path.display(),
                            error = %err,
                            "File not readable; skipped"
                        );
                        continue;
                    }
                };
                if !tracker.observe(id, mtime) {
                    continue;
                }

                let documents = Arc::clone(&documents);
                let coordinator = Arc::clone(&coordinator);
                let reloaded = tokio::task::spawn_blocking(move || {
                    match documents.reload_from_disk(id) {
                        Ok(Some(_)) => {
                            coordinator.on_saved(id);
                            Ok(true)
                        }
                        Ok(None) => Ok(false),
                        Err(err) => Err(err),
                    }
                })
                .await;

                match reloaded {
                    Ok(Ok(true)) => debug!(
                        target = "livemark::watch",
                        document_id = %id,
                        path = %path.display(),
                        "File changed on disk"
                    ),
                    Ok(Ok(false)) => {}
                    Ok(Err(err)) => warn!(
                        target = "livemark::watch",
                        document_id = %id,
                        path = %path.display(),
                        error = %err,
                        "Failed to reload changed file"
                    ),
                    Err(err) => warn!(
                        target = "livemark::watch",
                        document_id = %id,
                        error = %err,
                        "Reload task failed"
                    ),
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_not_a_change() {
        let mut tracker = MtimeTracker::default();
        let t0 = SystemTime::UNIX_EPOCH;

        assert!(!tracker.observe(DocumentId::new(1), t0));
        assert!(!tracker.observe(DocumentId::new(1), t0));
        assert!(tracker.observe(DocumentId::new(1), t0 + Duration::from_secs(1)));
    }

    #[test]
    fn closed_documents_are_forgotten() {
        let mut tracker = MtimeTracker::default();
        let t0 = SystemTime::UNIX_EPOCH;
        tracker.observe(DocumentId::new(1), t0);
        tracker.observe(DocumentId::new(2), t0);

        tracker.retain(&HashSet::from([DocumentId::new(2)]));

        assert!(!tracker.observe(DocumentId::new(1), t0 + Duration::from_secs(5)));
        assert!(tracker.observe(DocumentId::new(2), t0 + Duration::from_secs(5)));
    }
}
