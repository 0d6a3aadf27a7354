//! Cohesion analytic: who supports, perceives and co-works with whom.
//!
//! ## Scores
//!
//! - **Support** (directional): characters written into a paragraph someone
//!   else dominates count toward that main contributor once. Formatting or
//!   deleting another author's text adds `format_edit_weight` or
//!   `delete_weight` inline during replay.
//! - **Perception** (symmetric): a viewer scrolling over another author's
//!   characters.
//! - **Simultaneity** (symmetric): overlapping login sessions, in ms.
//!
//! Paragraph and perception evaluation only runs at stable revisions. Scroll
//! events are applied between revisions in timestamp order, so a viewer is
//! credited for the text that existed when they looked at it.

pub mod graph;
pub mod interactions;
pub mod paragraphs;
pub mod scroll;

pub use graph::{build_graph, CohesionGraph, GraphNode, NodeConnection, NodeDistance};
pub use interactions::{InteractionAccumulator, PairMode, SessionOverlap};
pub use paragraphs::{detect_paragraphs, Paragraph};
pub use scroll::ScrollEventQueue;

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use crate::policy::AnalyticsPolicyV1;
use crate::replay::{
    CharacterNode, DocumentList, DocumentReplay, InsertContext, NodeId, ReplayError, ReplayHooks,
    RetainContext,
};
use crate::stable::{StablePoint, StableTimestampSelector};
use crate::types::{
    AttributePool, AuthorId, LoginSession, NoOpMetrics, ReplayMetrics, Revision, RevisionIndex,
    ScrollEvent, Timestamp,
};

/// Per-character cohesion state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CohMeta {
    /// Already counted toward a main contributor.
    pub support_counted: bool,
    /// Viewers, in the order they first saw the character.
    pub seen_by: Vec<AuthorId>,
    /// Prefix of `seen_by` already scored.
    pub seen_by_evaluated: usize,
    /// Author came from the revision fallback.
    pub degraded: bool,
}

struct CohesionHooks<'a> {
    support: &'a mut InteractionAccumulator,
    format_edit_weight: f64,
    delete_weight: f64,
}

impl ReplayHooks<CohMeta> for CohesionHooks<'_> {
    fn new_meta(&mut self, ctx: &InsertContext<'_>) -> CohMeta {
        CohMeta {
            degraded: ctx.degraded,
            ..CohMeta::default()
        }
    }

    fn on_retain(&mut self, node: &mut CharacterNode<CohMeta>, ctx: &RetainContext<'_>) {
        if node.author != ctx.revision.author {
            self.support
                .notify(&ctx.revision.author, &node.author, self.format_edit_weight);
        }
    }

    fn on_delete(&mut self, node: &CharacterNode<CohMeta>, revision: &Revision) {
        if node.author != revision.author {
            self.support
                .notify(&revision.author, &node.author, self.delete_weight);
        }
    }
}

/// Counts from one catch-up pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatchUpReport {
    /// Revisions applied.
    pub applied: usize,
    /// Stable points chosen during this pass.
    pub new_stable_points: usize,
    /// Support and perception evaluations run.
    pub evaluations: usize,
    /// Scroll events marked on the document.
    pub scroll_events_applied: usize,
}

/// Incremental cohesion analysis of one document.
#[derive(Debug, Clone)]
pub struct CohesionAnalyzer {
    replay: DocumentReplay<CohMeta>,
    selector: StableTimestampSelector,
    support: InteractionAccumulator,
    perception: InteractionAccumulator,
    simultaneity: SessionOverlap,
    scrolls: ScrollEventQueue,
    ready: VecDeque<ScrollEvent>,
    authors: BTreeSet<AuthorId>,
    policy: AnalyticsPolicyV1,
}

impl CohesionAnalyzer {
    /// Create an analyzer for `pad`.
    pub fn new(pad: impl Into<String>, policy: AnalyticsPolicyV1) -> Self {
        Self::with_metrics(pad, policy, Arc::new(NoOpMetrics))
    }

    /// Create an analyzer reporting replay anomalies to `metrics`.
    pub fn with_metrics(
        pad: impl Into<String>,
        policy: AnalyticsPolicyV1,
        metrics: Arc<dyn ReplayMetrics>,
    ) -> Self {
        Self {
            replay: DocumentReplay::with_metrics(pad, metrics),
            selector: StableTimestampSelector::new(policy.cohesion_window()),
            support: InteractionAccumulator::directional(),
            perception: InteractionAccumulator::symmetric(),
            simultaneity: SessionOverlap::new(),
            scrolls: ScrollEventQueue::new(policy.scroll_cooldown_ms, policy.scroll_queue_capacity),
            ready: VecDeque::new(),
            authors: BTreeSet::new(),
            policy,
        }
    }

    /// Queue scroll events. They are applied once released by the cooldown.
    pub fn receive_scroll_events(&mut self, events: impl IntoIterator<Item = ScrollEvent>) {
        let events: Vec<ScrollEvent> = events.into_iter().collect();
        self.authors.extend(events.iter().map(|e| e.user.clone()));
        self.scrolls.push_batch(events);
    }

    /// Score login sessions against all sessions seen before.
    pub fn receive_login_sessions(&mut self, sessions: impl IntoIterator<Item = LoginSession>) {
        let sessions: Vec<LoginSession> = sessions.into_iter().collect();
        self.authors.extend(sessions.iter().map(|s| s.user.clone()));
        self.simultaneity.receive(sessions);
    }

    /// Replay `revisions` up to the latest stable one.
    ///
    /// `revisions` must be the document's gap-free prefix starting at index
    /// 0. Already applied revisions are skipped; a failed revision leaves the
    /// analyzer at the last good checkpoint.
    pub fn catch_up(
        &mut self,
        revisions: &[Revision],
        pool: &AttributePool,
        now: Timestamp,
    ) -> Result<CatchUpReport, ReplayError> {
        let mut report = CatchUpReport::default();
        self.authors.extend(pool.authors());

        let timestamps: Vec<Timestamp> = revisions.iter().map(|r| r.timestamp).collect();
        report.new_stable_points = self.selector.select(&timestamps, now).len();

        let released = self.scrolls.release(now);
        if !released.is_empty() {
            self.ready.extend(released);
            self.ready.make_contiguous().sort_by_key(|e| e.timestamp);
        }

        if let Some(limit) = self.selector.latest().map(|p| p.index) {
            let mut next = self.replay.next_index();
            while next <= limit {
                let Some(revision) = revisions.get(next as usize) else {
                    break;
                };
                report.scroll_events_applied += self.apply_ready_before(revision.timestamp);

                let mut hooks = CohesionHooks {
                    support: &mut self.support,
                    format_edit_weight: self.policy.format_edit_weight,
                    delete_weight: self.policy.delete_weight,
                };
                self.replay.apply(revision, pool, &mut hooks)?;
                report.applied += 1;

                if self.selector.is_stable_index(revision.index) {
                    self.evaluate();
                    report.evaluations += 1;
                }
                next += 1;
            }
        }

        if self.replay.next_index() as usize >= revisions.len() && !self.ready.is_empty() {
            report.scroll_events_applied += self.apply_ready_before(Timestamp::MAX);
            self.evaluate_perception();
        }

        if report.applied > 0 || report.scroll_events_applied > 0 {
            tracing::debug!(
                pad = %self.replay.pad(),
                applied = report.applied,
                evaluations = report.evaluations,
                scroll_events = report.scroll_events_applied,
                last_applied = ?self.replay.last_applied(),
                "cohesion catch-up"
            );
        }
        Ok(report)
    }

    fn apply_ready_before(&mut self, ts: Timestamp) -> usize {
        let mut applied = 0;
        while self.ready.front().is_some_and(|e| e.timestamp < ts) {
            if let Some(event) = self.ready.pop_front() {
                self.apply_scroll(&event);
                applied += 1;
            }
        }
        applied
    }

    /// Mark every character in the event's paragraph range as seen.
    fn apply_scroll(&mut self, event: &ScrollEvent) {
        let list = self.replay.list_mut();
        let ids: Vec<NodeId> = list.ids().collect();
        let content = |list: &DocumentList<CohMeta>, id: NodeId| {
            list.get(id).map_or('\n', |n| n.content)
        };

        let mut paragraph = 1u32;
        let mut i = 0;
        while i < ids.len() && paragraph < event.start_paragraph {
            if content(list, ids[i]) == '\n' {
                paragraph += 1;
            }
            i += 1;
        }
        while i < ids.len() && content(list, ids[i]) == '\n' {
            i += 1;
        }
        while i < ids.len() && paragraph <= event.end_paragraph {
            if let Some(node) = list.get_mut(ids[i]) {
                if node.content == '\n' {
                    paragraph += 1;
                } else if node.author != event.user && !node.meta.seen_by.contains(&event.user) {
                    node.meta.seen_by.push(event.user.clone());
                }
            }
            i += 1;
        }
    }

    fn evaluate(&mut self) {
        self.evaluate_support();
        self.evaluate_perception();
    }

    fn evaluate_support(&mut self) {
        let exclude = self.policy.exclude_degraded_attribution;
        let list = self.replay.list_mut();
        let paragraphs = detect_paragraphs(list);
        let ids: Vec<NodeId> = list.ids().collect();

        for paragraph in &paragraphs {
            let Some(main) = &paragraph.main_contributor else {
                continue;
            };
            for id in &ids[paragraph.start..paragraph.end] {
                let Some(node) = list.get_mut(*id) else {
                    continue;
                };
                if node.meta.support_counted {
                    continue;
                }
                node.meta.support_counted = true;
                if node.author != *main && !(exclude && node.meta.degraded) {
                    self.support.notify(&node.author, main, 1.0);
                }
            }
        }
    }

    fn evaluate_perception(&mut self) {
        let exclude = self.policy.exclude_degraded_attribution;
        let list = self.replay.list_mut();
        let ids: Vec<NodeId> = list.ids().collect();
        for id in ids {
            let Some(node) = list.get_mut(id) else {
                continue;
            };
            let meta = &mut node.meta;
            if meta.seen_by.len() <= meta.seen_by_evaluated {
                continue;
            }
            if !(exclude && meta.degraded) {
                for viewer in &meta.seen_by[meta.seen_by_evaluated..] {
                    self.perception.notify(&node.author, viewer, 1.0);
                }
            }
            meta.seen_by_evaluated = meta.seen_by.len();
        }
    }

    /// The diagram over every author seen so far.
    pub fn graph(&self) -> CohesionGraph {
        let mut authors = self.authors.clone();
        authors.extend(self.support.authors().iter().cloned());
        authors.extend(self.perception.authors().iter().cloned());
        authors.extend(self.simultaneity.accumulator().authors().iter().cloned());
        authors.retain(|a| !a.is_empty());
        build_graph(
            &authors,
            &self.support,
            &self.perception,
            &self.simultaneity,
            &self.policy,
        )
    }

    /// Last revision applied to the private document.
    pub fn last_applied(&self) -> Option<RevisionIndex> {
        self.replay.last_applied()
    }

    /// Stable points chosen so far.
    pub fn stable_points(&self) -> &[StablePoint] {
        self.selector.points()
    }

    /// Fallback-attributed characters per revision author.
    pub fn attribution_anomalies(&self) -> &BTreeMap<AuthorId, u64> {
        self.replay.attribution_anomalies()
    }

    /// Scroll events waiting for the cooldown or for replay to catch up.
    pub fn pending_scroll_events(&self) -> usize {
        self.scrolls.len() + self.ready.len()
    }

    /// Support accumulator.
    pub fn support(&self) -> &InteractionAccumulator {
        &self.support
    }

    /// Perception accumulator.
    pub fn perception(&self) -> &InteractionAccumulator {
        &self.perception
    }

    /// Simultaneity accumulator.
    pub fn simultaneity(&self) -> &SessionOverlap {
        &self.simultaneity
    }

    /// The private replay.
    pub fn replay(&self) -> &DocumentReplay<CohMeta> {
        &self.replay
    }
}
