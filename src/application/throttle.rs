//! Debounced render scheduling.
//!
//! One background thread owns the set of pending renders. Typing produces
//! [`Schedule::Debounced`] requests that coalesce into a single render once the
//! document has been quiet for the requested delay; saves and explicit
//! previews produce [`Schedule::Immediate`] requests that cancel whatever was
//! pending and render straight away.
//!
//! Renders never run under the queue lock. Fired entries are handed to a
//! [`Dispatcher`], which either runs them in place or on the tokio blocking
//! pool, and each job re-reads the live document before rendering.
//!
//! An immediate request can arrive after a debounced entry fired but before
//! its job ran, when there is nothing left to cancel. Immediate requests stamp
//! the document, and a debounced job that sees a newer stamp than the one
//! taken when it fired is dropped.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use metrics::gauge;
use tokio::runtime::Handle;
use tracing::{debug, error, info, trace};

use crate::application::render::RenderPipeline;
use crate::application::repos::DocumentStore;
use crate::domain::{Document, DocumentId};
use crate::util::lock::{condvar_wait, condvar_wait_timeout, mutex_lock};

const SOURCE: &str = "application::throttle";
const THREAD_NAME: &str = "livemark-throttle";

/// Requests for a document that already has a pending entry are dropped when
/// that document was signalled more recently than this.
pub const MIN_SIGNAL_INTERVAL: Duration = Duration::from_millis(10);
/// Tick of the scheduler loop while entries are pending. Also the minimum
/// amount of time charged against pending entries per tick.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub(crate) const METRIC_PENDING_RENDERS: &str = "livemark_pending_renders";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Cancel any pending render and render now.
    Immediate,
    /// Render once no further request arrived for this long.
    Debounced(Duration),
}

pub type RenderJob = Box<dyn FnOnce() + Send + 'static>;

/// Where fired renders run.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: RenderJob);
}

/// Runs jobs on the calling thread: the scheduler thread for debounced
/// renders, the caller of `put` for immediate ones.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: RenderJob) {
        job();
    }
}

/// Hands jobs to the tokio blocking pool so the scheduler thread never waits
/// on a slow renderer.
#[derive(Debug, Clone)]
pub struct RuntimeDispatcher {
    handle: Handle,
}

impl RuntimeDispatcher {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Dispatcher bound to the runtime of the calling task, if there is one.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Dispatcher for RuntimeDispatcher {
    fn dispatch(&self, job: RenderJob) {
        trace!(target = "livemark::throttle", "dispatch.spawn_blocking");
        drop(self.handle.spawn_blocking(job));
    }
}

#[derive(Debug, Clone)]
struct PendingEntry {
    id: DocumentId,
    /// Backing path when the entry was last refreshed.
    path: Option<PathBuf>,
    remaining: Duration,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<DocumentId, PendingEntry>,
    last_signaled: HashMap<DocumentId, Instant>,
    /// Stamp of the latest immediate request per document.
    preempted: HashMap<DocumentId, u64>,
    next_stamp: u64,
    stopping: bool,
}

impl QueueState {
    /// Signal storm guard, scoped to a single document.
    fn too_soon(&self, id: DocumentId, now: Instant) -> bool {
        self.pending.contains_key(&id)
            && self
                .last_signaled
                .get(&id)
                .is_some_and(|at| now.saturating_duration_since(*at) < MIN_SIGNAL_INTERVAL)
    }

    /// Create or refresh the entry for `id`. Returns `true` when the loop was
    /// idle and must be woken.
    fn upsert(&mut self, id: DocumentId, path: Option<PathBuf>, delay: Duration) -> bool {
        let was_idle = self.pending.is_empty();
        self.pending
            .entry(id)
            .and_modify(|entry| {
                entry.path.clone_from(&path);
                entry.remaining = delay;
            })
            .or_insert_with(|| PendingEntry {
                id,
                path: path.clone(),
                remaining: delay,
            });
        was_idle
    }

    fn preempt(&mut self, id: DocumentId) {
        self.next_stamp += 1;
        self.preempted.insert(id, self.next_stamp);
    }

    fn stamp(&self, id: DocumentId) -> Option<u64> {
        self.preempted.get(&id).copied()
    }

    fn record_pending(&self) {
        gauge!(METRIC_PENDING_RENDERS).set(self.pending.len() as f64);
    }

    /// Charge `elapsed` against every entry and pull out the ones that expired.
    fn advance(&mut self, elapsed: Duration) -> Vec<PendingEntry> {
        let mut fired = Vec::new();
        self.pending.retain(|_, entry| {
            entry.remaining = entry.remaining.saturating_sub(elapsed);
            if entry.remaining.is_zero() {
                fired.push(entry.clone());
                false
            } else {
                true
            }
        });
        fired
    }
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Condvar,
    closed: AtomicBool,
    pipeline: RenderPipeline,
    documents: Arc<dyn DocumentStore>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Shared {
    fn lock(&self, op: &'static str) -> MutexGuard<'_, QueueState> {
        mutex_lock(&self.state, SOURCE, op)
    }
}

/// What a job checks against the live document before rendering.
enum Expectation {
    Immediate,
    Debounced {
        path: Option<PathBuf>,
        stamp: Option<u64>,
    },
}

pub struct ThrottleScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThrottleScheduler {
    /// Spawn the scheduler thread.
    pub fn start(
        pipeline: RenderPipeline,
        documents: Arc<dyn DocumentStore>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Condvar::new(),
            closed: AtomicBool::new(false),
            pipeline,
            documents,
            dispatcher,
        });

        let loop_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run_loop(&loop_shared))?;

        info!(target = "livemark::throttle", thread = THREAD_NAME, "Throttle scheduler started");

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Request a render of `document`. Returns `false` when the request was
    /// ignored: no enabled renderer, dropped by the signal guard, or the
    /// scheduler is stopped. Never blocks on a render unless the dispatcher
    /// runs jobs inline.
    pub fn put(&self, document: &Document, schedule: Schedule) -> bool {
        if self.shared.closed.load(Ordering::SeqCst) {
            return false;
        }
        if !self.shared.pipeline.has_renderer_enabled(document) {
            return false;
        }

        let id = document.id;
        let mut state = self.shared.lock("put");
        if state.stopping {
            return false;
        }
        if state.too_soon(id, Instant::now()) {
            trace!(target = "livemark::throttle", document_id = %id, "Request dropped by signal guard");
            return false;
        }

        match schedule {
            Schedule::Immediate => {
                state.preempt(id);
                if state.pending.remove(&id).is_some() {
                    debug!(target = "livemark::throttle", document_id = %id, "Pending render cancelled");
                    state.record_pending();
                }
                drop(state);

                dispatch(&self.shared, id, Expectation::Immediate);
                self.shared
                    .lock("put.signal")
                    .last_signaled
                    .insert(id, Instant::now());
            }
            Schedule::Debounced(delay) => {
                let wake = state.upsert(id, document.path.clone(), delay);
                state.record_pending();
                drop(state);
                if wake {
                    self.shared.wake.notify_one();
                }
            }
        }

        true
    }

    /// Cancel anything pending for `id` and forget its signal history.
    pub fn forget(&self, id: DocumentId) {
        let mut state = self.shared.lock("forget");
        state.pending.remove(&id);
        state.last_signaled.remove(&id);
        state.preempted.remove(&id);
        state.record_pending();
    }

    pub fn is_pending(&self, id: DocumentId) -> bool {
        self.shared.lock("is_pending").pending.contains_key(&id)
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock("pending_len").pending.len()
    }

    /// Stop the loop and wait for the thread to exit. No render is dispatched
    /// once this returns; jobs already handed to the runtime become no-ops.
    pub fn stop(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        {
            let mut state = self.shared.lock("stop");
            state.stopping = true;
            state.pending.clear();
            state.record_pending();
        }
        self.shared.wake.notify_all();

        let worker = mutex_lock(&self.worker, SOURCE, "stop.join").take();
        let Some(worker) = worker else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            // Called from a job running on the loop thread; the loop exits on its own.
            return;
        }
        if worker.join().is_err() {
            error!(target = "livemark::throttle", "Throttle scheduler thread panicked");
        } else {
            info!(target = "livemark::throttle", "Throttle scheduler stopped");
        }
    }
}

impl Drop for ThrottleScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: &Arc<Shared>) {
    let mut state = shared.lock("loop");
    let mut reference = Instant::now();

    loop {
        if state.stopping {
            break;
        }

        if state.pending.is_empty() {
            state = condvar_wait(&shared.wake, state, SOURCE, "loop.idle");
            // Idle time is not charged to entries created while waiting.
            reference = Instant::now();
            continue;
        }

        state = condvar_wait_timeout(&shared.wake, state, POLL_INTERVAL, SOURCE, "loop.tick");
        if state.stopping {
            break;
        }

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(reference).max(POLL_INTERVAL);
        reference = now;

        let fired = state.advance(elapsed);
        if fired.is_empty() {
            continue;
        }
        state.record_pending();
        let fired: Vec<_> = fired
            .into_iter()
            .map(|entry| {
                let stamp = state.stamp(entry.id);
                (entry, stamp)
            })
            .collect();

        drop(state);
        for (entry, stamp) in fired {
            trace!(
                target = "livemark::throttle",
                document_id = %entry.id,
                "Debounced render fired"
            );
            dispatch(
                shared,
                entry.id,
                Expectation::Debounced {
                    path: entry.path,
                    stamp,
                },
            );
        }
        state = shared.lock("loop.relock");
    }
}

fn dispatch(shared: &Arc<Shared>, id: DocumentId, expectation: Expectation) {
    let job_shared = Arc::clone(shared);
    shared
        .dispatcher
        .dispatch(Box::new(move || run_job(&job_shared, id, expectation)));
}

fn run_job(shared: &Shared, id: DocumentId, expectation: Expectation) {
    if shared.closed.load(Ordering::SeqCst) {
        return;
    }

    let Some(document) = shared.documents.get(id) else {
        debug!(
            target = "livemark::throttle",
            document_id = %id,
            reason = "closed",
            "SchedulingRace: render dropped"
        );
        return;
    };

    if let Expectation::Debounced { path, stamp } = &expectation {
        let reason = if document.loading {
            Some("loading")
        } else if document.path != *path {
            Some("path_changed")
        } else if shared.lock("job.stamp").stamp(id) != *stamp {
            Some("superseded")
        } else {
            None
        };
        if let Some(reason) = reason {
            debug!(
                target = "livemark::throttle",
                document_id = %id,
                reason,
                "SchedulingRace: render dropped"
            );
            return;
        }
    }

    match shared.pipeline.render_entry(&document) {
        Ok(_) => {
            shared
                .pipeline
                .discard_if_closed(shared.documents.as_ref(), id);
        }
        Err(err) if err.is_no_renderer() => {
            debug!(target = "livemark::throttle", document_id = %id, "No renderer; skipped");
        }
        // Already logged by the pipeline; the loop carries on.
        Err(_) => {}
    }

    if matches!(expectation, Expectation::Debounced { .. }) {
        shared.lock("job.signal").last_signaled.insert(id, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> DocumentId {
        DocumentId::new(raw)
    }

    #[test]
    fn guard_only_applies_to_documents_with_pending_entries() {
        let now = Instant::now();
        let mut state = QueueState::default();
        state.last_signaled.insert(id(1), now);

        assert!(!state.too_soon(id(1), now + Duration::from_millis(1)));

        state.upsert(id(1), None, Duration::from_millis(500));
        assert!(state.too_soon(id(1), now + Duration::from_millis(5)));
        assert!(!state.too_soon(id(1), now + Duration::from_millis(15)));
    }

    #[test]
    fn guard_is_scoped_per_document() {
        let now = Instant::now();
        let mut state = QueueState::default();
        state.last_signaled.insert(id(1), now);
        state.upsert(id(2), None, Duration::from_millis(500));

        assert!(!state.too_soon(id(2), now + Duration::from_millis(1)));
    }

    #[test]
    fn upsert_coalesces_and_refreshes() {
        let mut state = QueueState::default();

        assert!(state.upsert(id(1), Some("/a.md".into()), Duration::from_millis(500)));
        state.advance(Duration::from_millis(300));
        assert!(!state.upsert(id(1), Some("/b.md".into()), Duration::from_millis(400)));

        assert_eq!(state.pending.len(), 1);
        let entry = &state.pending[&id(1)];
        assert_eq!(entry.remaining, Duration::from_millis(400));
        assert_eq!(entry.path.as_deref(), Some(std::path::Path::new("/b.md")));
    }

    #[test]
    fn preempt_stamps_are_unique_per_request() {
        let mut state = QueueState::default();
        assert_eq!(state.stamp(id(1)), None);

        state.preempt(id(1));
        let first = state.stamp(id(1));
        state.preempt(id(2));
        state.preempt(id(1));

        assert_ne!(state.stamp(id(1)), first);
        assert_ne!(state.stamp(id(1)), state.stamp(id(2)));
    }

    #[test]
    fn advance_fires_expired_entries_only() {
        let mut state = QueueState::default();
        state.upsert(id(1), None, Duration::from_millis(40));
        state.upsert(id(2), None, Duration::from_millis(100));

        assert!(state.advance(Duration::from_millis(20)).is_empty());
        let fired = state.advance(Duration::from_millis(20));

        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].id, id(1));
        assert_eq!(state.pending.len(), 1);
        assert_eq!(state.pending[&id(2)].remaining, Duration::from_millis(60));
    }
}
