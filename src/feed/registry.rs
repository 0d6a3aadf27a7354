//! Tracked documents keyed by pad, each with a single-flight worker.
//!
//! ## Concurrency
//!
//! - One worker task per document waits on a `watch` channel. Signals sent
//!   while a pass runs coalesce into a single trailing pass.
//! - The document state sits behind a `tokio::sync::Mutex`, so inline
//!   [`DocumentRegistry::refresh`] calls serialize with the worker.
//! - Scroll and login events land in a per-document inbox and are handed
//!   over at the start of the next pass.
//! - Documents share nothing, so passes for different pads run in parallel.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{DocumentStatus, FeedError, PassReport, TrackedDocument};
use crate::analytics::{AuthorBlock, CohesionGraph, TimelineColumn};
use crate::policy::AnalyticsPolicyV1;
use crate::store::RevisionSource;
use crate::types::{LoginSession, ReplayMetrics, RevisionIndex, ScrollEvent, Timestamp};

/// Source of "now" in milliseconds.
pub type RegistryClock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

fn wall_clock() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Default)]
struct Inbox {
    scrolls: Vec<ScrollEvent>,
    sessions: Vec<LoginSession>,
}

impl Inbox {
    fn take(&mut self) -> (Vec<ScrollEvent>, Vec<LoginSession>) {
        (
            std::mem::take(&mut self.scrolls),
            std::mem::take(&mut self.sessions),
        )
    }
}

struct DocumentEntry {
    pad: String,
    state: tokio::sync::Mutex<TrackedDocument>,
    inbox: Mutex<Inbox>,
    signal: watch::Sender<u64>,
    last_seen_head: Mutex<Option<RevisionIndex>>,
    needs_recheck: AtomicBool,
}

impl DocumentEntry {
    fn signal(&self) {
        self.signal.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

struct Inner<S> {
    source: Arc<S>,
    policy: AnalyticsPolicyV1,
    metrics: Arc<dyn ReplayMetrics>,
    clock: RegistryClock,
    documents: RwLock<BTreeMap<String, Arc<DocumentEntry>>>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Every tracked document of one revision source.
///
/// Cheap to clone; clones share the same documents and workers.
pub struct DocumentRegistry<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for DocumentRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: RevisionSource + 'static> DocumentRegistry<S> {
    /// Create a registry reading from `source`.
    pub fn new(
        source: Arc<S>,
        policy: AnalyticsPolicyV1,
        metrics: Arc<dyn ReplayMetrics>,
    ) -> Self {
        Self::with_clock(source, policy, metrics, Arc::new(wall_clock))
    }

    /// Create a registry with a custom clock.
    pub fn with_clock(
        source: Arc<S>,
        policy: AnalyticsPolicyV1,
        metrics: Arc<dyn ReplayMetrics>,
        clock: RegistryClock,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                source,
                policy,
                metrics,
                clock,
                documents: RwLock::new(BTreeMap::new()),
                shutdown,
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start tracking `pad`. Returns false when it was already tracked.
    ///
    /// Inside a tokio runtime this also spawns the document's worker.
    pub fn track(&self, pad: &str) -> bool {
        self.entry_or_insert(pad).1
    }

    fn entry(&self, pad: &str) -> Option<Arc<DocumentEntry>> {
        self.inner.documents.read().get(pad).cloned()
    }

    fn entry_or_insert(&self, pad: &str) -> (Arc<DocumentEntry>, bool) {
        if let Some(entry) = self.entry(pad) {
            return (entry, false);
        }

        let mut documents = self.inner.documents.write();
        if let Some(entry) = documents.get(pad) {
            return (entry.clone(), false);
        }
        let (signal, receiver) = watch::channel(0u64);
        let entry = Arc::new(DocumentEntry {
            pad: pad.to_string(),
            state: tokio::sync::Mutex::new(TrackedDocument::new(
                pad,
                self.inner.policy.clone(),
                self.inner.metrics.clone(),
            )),
            inbox: Mutex::new(Inbox::default()),
            signal,
            last_seen_head: Mutex::new(None),
            needs_recheck: AtomicBool::new(true),
        });
        documents.insert(pad.to_string(), entry.clone());
        drop(documents);

        tracing::info!(pad, "tracking document");
        self.spawn_worker(entry.clone(), receiver);
        (entry, true)
    }

    fn spawn_worker(&self, entry: Arc<DocumentEntry>, mut signal: watch::Receiver<u64>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(pad = %entry.pad, "no runtime, document refreshes inline only");
            return;
        };
        let registry = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let worker = handle.spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    changed = signal.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
                // Errors are logged and kept in the document status.
                let _ = registry.run_pass(&entry).await;
            }
            tracing::debug!(pad = %entry.pad, "document worker stopped");
        });
        self.inner.workers.lock().push(worker);
    }

    async fn run_pass(&self, entry: &DocumentEntry) -> Result<PassReport, FeedError> {
        let started = Instant::now();
        let mut document = entry.state.lock().await;
        let (scrolls, sessions) = entry.inbox.lock().take();
        let now = (self.inner.clock)();

        let result = document
            .refresh(self.inner.source.as_ref(), scrolls, sessions, now)
            .await;

        *entry.last_seen_head.lock() = document.log().known_head();
        entry
            .needs_recheck
            .store(document.needs_recheck(), Ordering::Relaxed);
        let latency_ms = started.elapsed().as_millis() as u64;

        if let Ok(report) = &result {
            tracing::info!(
                pad = %entry.pad,
                fetched = report.sync.fetched,
                cohesion_applied = report.cohesion.applied,
                blocks_applied = report.blocks_applied,
                timeline_columns_added = report.timeline_columns_added,
                latency_ms,
                "document pass complete"
            );
        }
        result
    }

    /// Track every pad the source knows. Returns how many were new.
    pub async fn track_all(&self) -> Result<usize, FeedError> {
        let pads = self
            .inner
            .source
            .pads()
            .await
            .map_err(FeedError::from_store)?;
        let mut added = 0;
        for pad in &pads {
            let (entry, created) = self.entry_or_insert(pad);
            if created {
                entry.signal();
                added += 1;
            }
        }
        Ok(added)
    }

    /// Track `pad` only when the source has revisions for it, catching it up
    /// once on first sight. Returns whether the pad is tracked afterwards.
    ///
    /// Unknown pads are never inserted, so arbitrary names from callers do
    /// not accumulate documents and workers.
    pub async fn track_if_known(&self, pad: &str) -> Result<bool, FeedError> {
        if self.is_tracked(pad) {
            return Ok(true);
        }
        let head = self
            .inner
            .source
            .head(pad)
            .await
            .map_err(FeedError::from_store)?;
        if head.is_none() {
            tracing::debug!(pad, "pad has no revisions, not tracking");
            return Ok(false);
        }
        let (entry, created) = self.entry_or_insert(pad);
        if created {
            // Failures are kept in the document status.
            let _ = self.run_pass(&entry).await;
        }
        Ok(true)
    }

    /// Signal that `pad` may have new revisions. Tracks it when needed.
    pub fn notify(&self, pad: &str) {
        self.entry_or_insert(pad).0.signal();
    }

    /// Queue scroll events for `pad`. Returns how many were queued.
    pub fn ingest_scroll_events(&self, pad: &str, events: Vec<ScrollEvent>) -> usize {
        let count = events.len();
        if count == 0 {
            return 0;
        }
        let (entry, _) = self.entry_or_insert(pad);
        entry.inbox.lock().scrolls.extend(events);
        entry.signal();
        count
    }

    /// Queue login sessions for `pad`. Returns how many were queued.
    pub fn ingest_login_sessions(&self, pad: &str, sessions: Vec<LoginSession>) -> usize {
        let count = sessions.len();
        if count == 0 {
            return 0;
        }
        let (entry, _) = self.entry_or_insert(pad);
        entry.inbox.lock().sessions.extend(sessions);
        entry.signal();
        count
    }

    /// Run one pass for `pad` now, serialized with its worker.
    pub async fn refresh(&self, pad: &str) -> Result<PassReport, FeedError> {
        let (entry, _) = self.entry_or_insert(pad);
        self.run_pass(&entry).await
    }

    /// Cohesion graph of `pad`. Empty when the pad is not tracked.
    pub async fn cohesion(&self, pad: &str) -> CohesionGraph {
        match self.entry(pad) {
            Some(entry) => entry.state.lock().await.cohesion_graph(),
            None => CohesionGraph::empty(),
        }
    }

    /// Author blocks of `pad`. Empty when the pad is not tracked.
    pub async fn blocks(&self, pad: &str) -> Vec<AuthorBlock> {
        match self.entry(pad) {
            Some(entry) => entry.state.lock().await.blocks().to_vec(),
            None => Vec::new(),
        }
    }

    /// Timeline of `pad`. Empty when the pad is not tracked.
    pub async fn timeline(&self, pad: &str) -> Result<Vec<TimelineColumn>, FeedError> {
        let Some(entry) = self.entry(pad) else {
            return Ok(Vec::new());
        };
        let now = (self.inner.clock)();
        let columns = entry.state.lock().await.timeline(now);
        columns
    }

    /// Progress of `pad`. Only the pad name is set when it is not tracked.
    pub async fn status(&self, pad: &str) -> DocumentStatus {
        match self.entry(pad) {
            Some(entry) => entry.state.lock().await.status(),
            None => DocumentStatus {
                pad: pad.to_string(),
                ..Default::default()
            },
        }
    }

    /// Whether `pad` is tracked.
    pub fn is_tracked(&self, pad: &str) -> bool {
        self.inner.documents.read().contains_key(pad)
    }

    /// Tracked pads, sorted.
    pub fn pads(&self) -> Vec<String> {
        self.inner.documents.read().keys().cloned().collect()
    }

    /// Poll the source every `interval` and signal documents whose head
    /// grew or that still have pending work.
    pub fn spawn_poller(&self, interval: Duration) {
        let registry = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let poller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.poll_once().await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("poller stopped");
        });
        self.inner.workers.lock().push(poller);
        tracing::info!(interval_ms = interval.as_millis() as u64, "revision poller started");
    }

    /// Check every tracked pad once. Returns how many were signalled.
    pub async fn poll_once(&self) -> usize {
        let entries: Vec<Arc<DocumentEntry>> =
            self.inner.documents.read().values().cloned().collect();
        let mut signalled = 0;
        for entry in entries {
            let head = match self.inner.source.head(&entry.pad).await {
                Ok(head) => head,
                Err(e) => {
                    tracing::warn!(pad = %entry.pad, error = %e, "head poll failed");
                    continue;
                }
            };
            let grew = head > *entry.last_seen_head.lock();
            if grew || entry.needs_recheck.load(Ordering::Relaxed) {
                entry.signal();
                signalled += 1;
            }
        }
        signalled
    }

    /// Stop the poller and every worker, waiting for running passes.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.workers.lock());
        let count = workers.len();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "worker ended abnormally");
            }
        }
        tracing::info!(workers = count, "registry shut down");
    }

    /// The revision source.
    pub fn source(&self) -> &Arc<S> {
        &self.inner.source
    }

    /// The analytics policy every document uses.
    pub fn policy(&self) -> &AnalyticsPolicyV1 {
        &self.inner.policy
    }
}
