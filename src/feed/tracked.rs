//! One tracked document: its revision log and its analytics.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{FeedError, RevisionLog, SyncReport};
use crate::analytics::{
    AuthorBlock, BlockAnalyzer, CatchUpReport, CohesionAnalyzer, CohesionGraph, TimelineAnalyzer,
    TimelineColumn,
};
use crate::policy::AnalyticsPolicyV1;
use crate::store::RevisionSource;
use crate::types::{
    AuthorId, LoginSession, ReplayMetrics, RevisionIndex, ScrollEvent, Timestamp,
};

/// Counts from one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Revision log sync.
    pub sync: SyncReport,
    /// Cohesion catch-up.
    pub cohesion: CatchUpReport,
    /// Revisions applied by the block analytic.
    pub blocks_applied: usize,
    /// Permanent timeline columns added.
    pub timeline_columns_added: usize,
}

/// Snapshot of a document's progress, for status endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentStatus {
    /// Pad name.
    pub pad: String,
    /// Head reported by the store on the last sync.
    pub known_head: Option<RevisionIndex>,
    /// Last revision fetched into the log.
    pub last_fetched: Option<RevisionIndex>,
    /// Last revision applied by the block analytic (the most current replay).
    pub last_applied: Option<RevisionIndex>,
    /// Last revision applied by the cohesion analytic.
    pub cohesion_last_applied: Option<RevisionIndex>,
    /// Last revision applied to the permanent timeline.
    pub timeline_last_applied: Option<RevisionIndex>,
    /// Stable points chosen by the cohesion analytic.
    pub stable_points: usize,
    /// Permanent timeline columns.
    pub timeline_days: usize,
    /// Scroll events waiting for their cooldown.
    pub pending_scroll_events: usize,
    /// Characters attributed through the fallback, per revision author.
    pub attribution_anomalies: BTreeMap<AuthorId, u64>,
    /// Revision the last sync could not fetch.
    pub missing_revision: Option<RevisionIndex>,
    /// Revision every replay is stuck on. Cleared by a clean pass.
    pub stalled_at: Option<RevisionIndex>,
    /// Error of the last pass, if it failed.
    pub last_error: Option<String>,
    /// Completed passes.
    pub passes: u64,
}

/// A document with its revision log and one instance of every analytic.
///
/// Each analytic owns a private replay of the document.
#[derive(Debug)]
pub struct TrackedDocument {
    pad: String,
    log: RevisionLog,
    cohesion: CohesionAnalyzer,
    blocks: BlockAnalyzer,
    timeline: TimelineAnalyzer,
    policy: AnalyticsPolicyV1,
    last_error: Option<FeedError>,
    passes: u64,
}

impl TrackedDocument {
    /// Start tracking `pad` with nothing fetched yet.
    pub fn new(
        pad: impl Into<String>,
        policy: AnalyticsPolicyV1,
        metrics: Arc<dyn ReplayMetrics>,
    ) -> Self {
        let pad = pad.into();
        // Every analytic replays the same revisions; only the block replay,
        // which is never gated, reports replay anomalies.
        Self {
            log: RevisionLog::new(pad.clone(), metrics.clone()),
            cohesion: CohesionAnalyzer::new(pad.clone(), policy.clone()),
            blocks: BlockAnalyzer::with_metrics(pad.clone(), metrics),
            timeline: TimelineAnalyzer::new(pad.clone(), policy.timeline_utc_offset_minutes),
            pad,
            policy,
            last_error: None,
            passes: 0,
        }
    }

    /// Sync the log, hand over queued events and catch every analytic up.
    ///
    /// Analytics advance independently: one failing does not hold back the
    /// others. The first error is returned and kept for [`status`](Self::status).
    pub async fn refresh<S: RevisionSource + ?Sized>(
        &mut self,
        source: &S,
        scrolls: Vec<ScrollEvent>,
        sessions: Vec<LoginSession>,
        now: Timestamp,
    ) -> Result<PassReport, FeedError> {
        if !scrolls.is_empty() {
            self.cohesion.receive_scroll_events(scrolls);
        }
        if !sessions.is_empty() {
            self.cohesion.receive_login_sessions(sessions);
        }

        let stalled = self.stalled_at();
        let result = self.run_pass(source, now).await;
        self.passes += 1;
        match &result {
            Ok(_) => self.last_error = None,
            Err(e) => {
                if stalled.is_some() && stalled == e.stalled_at() {
                    tracing::debug!(pad = %self.pad, error = %e, "document still stalled");
                } else if e.is_fatal() {
                    tracing::error!(pad = %self.pad, error = %e, "document pass failed");
                } else {
                    tracing::warn!(pad = %self.pad, error = %e, "document pass failed");
                }
                self.last_error = Some(e.clone());
            }
        }
        result
    }

    async fn run_pass<S: RevisionSource + ?Sized>(
        &mut self,
        source: &S,
        now: Timestamp,
    ) -> Result<PassReport, FeedError> {
        let mut report = PassReport {
            sync: self.log.sync(source, &self.policy).await?,
            ..Default::default()
        };
        let revisions = self.log.revisions();
        let pool = self.log.pool();
        let mut first_error = None;

        match self.cohesion.catch_up(revisions, pool, now) {
            Ok(cohesion) => report.cohesion = cohesion,
            Err(source) => {
                first_error.get_or_insert(FeedError::Replay {
                    pad: self.pad.clone(),
                    source,
                });
            }
        }
        match self.blocks.catch_up(revisions, pool) {
            Ok(applied) => report.blocks_applied = applied,
            Err(source) => {
                first_error.get_or_insert(FeedError::Replay {
                    pad: self.pad.clone(),
                    source,
                });
            }
        }
        match self.timeline.advance(revisions, pool, now) {
            Ok(added) => report.timeline_columns_added = added,
            Err(source) => {
                first_error.get_or_insert(FeedError::Timeline {
                    pad: self.pad.clone(),
                    source,
                });
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Current cohesion graph.
    pub fn cohesion_graph(&self) -> CohesionGraph {
        self.cohesion.graph()
    }

    /// Author blocks of the latest fetched revision.
    pub fn blocks(&self) -> &[AuthorBlock] {
        self.blocks.blocks()
    }

    /// Timeline columns, with a provisional column for the day of `now`.
    pub fn timeline(&mut self, now: Timestamp) -> Result<Vec<TimelineColumn>, FeedError> {
        let revisions = self.log.revisions();
        let pool = self.log.pool();
        let timeline_error = |source| FeedError::Timeline {
            pad: self.pad.clone(),
            source,
        };
        self.timeline
            .advance(revisions, pool, now)
            .map_err(timeline_error)?;
        self.timeline
            .columns(revisions, pool, now)
            .map_err(timeline_error)
    }

    /// Progress snapshot.
    pub fn status(&self) -> DocumentStatus {
        DocumentStatus {
            pad: self.pad.clone(),
            known_head: self.log.known_head(),
            last_fetched: self.log.last_index(),
            last_applied: self.blocks.last_applied(),
            cohesion_last_applied: self.cohesion.last_applied(),
            timeline_last_applied: self.timeline.last_applied(),
            stable_points: self.cohesion.stable_points().len(),
            timeline_days: self.timeline.permanent_columns().len(),
            pending_scroll_events: self.cohesion.pending_scroll_events(),
            attribution_anomalies: self.blocks.attribution_anomalies().clone(),
            missing_revision: self.log.gap(),
            stalled_at: self.stalled_at(),
            last_error: self.last_error.as_ref().map(ToString::to_string),
            passes: self.passes,
        }
    }

    /// True when a later pass may make progress without new revisions:
    /// revisions waiting for stability, scroll events in their cooldown, or
    /// a gap in the log. Revisions from a stalled one on are not rechecked
    /// until the head moves.
    pub fn needs_recheck(&self) -> bool {
        let fetched = match self.stalled_at() {
            Some(stalled) => stalled.checked_sub(1),
            None => self.log.last_index(),
        };
        self.log.gap().is_some()
            || self.cohesion.last_applied() != fetched
            || self.cohesion.pending_scroll_events() > 0
    }

    /// Revision the last pass stalled on.
    pub fn stalled_at(&self) -> Option<RevisionIndex> {
        self.last_error.as_ref().and_then(FeedError::stalled_at)
    }

    /// Pad name.
    pub fn pad(&self) -> &str {
        &self.pad
    }

    /// The revision log.
    pub fn log(&self) -> &RevisionLog {
        &self.log
    }

    /// The cohesion analytic.
    pub fn cohesion(&self) -> &CohesionAnalyzer {
        &self.cohesion
    }
}
