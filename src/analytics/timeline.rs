//! Day-by-day snapshots of who wrote which part of the document.
//!
//! Each calendar day since the document was created gets a column of
//! rectangles, one per author run in the document as it stood at the end of
//! that day. Between two neighbouring columns, parallelograms connect the
//! characters present in both, so moved and surviving text can be traced.
//!
//! Finished days are permanent. The current day is provisional: it is built
//! on a copy of the document and recomputed on every request.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::replay::{detect_runs, DocumentList, DocumentReplay, PlainHooks, ReplayError};
use crate::stable::{calendar_day, StableTimestampSelector};
use crate::types::{
    AttributePool, AuthorId, NoOpMetrics, ReplayMetrics, Revision, RevisionIndex, Timestamp,
};

/// Timeline errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimelineError {
    /// Replay of the private document failed.
    #[error(transparent)]
    Replay(#[from] ReplayError),

    /// A timestamp has no calendar day in the configured offset.
    #[error("Timestamp {0} cannot be placed on a calendar day")]
    UnrepresentableTimestamp(Timestamp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mark {
    column: usize,
    position: usize,
}

/// Positions of a character in the two most recent columns it appeared in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineMeta {
    last: Option<Mark>,
    before_last: Option<Mark>,
}

impl TimelineMeta {
    fn mark(&mut self, column: usize, position: usize) {
        self.before_last = self.last;
        self.last = Some(Mark { column, position });
    }

    /// Positions in `column - 1` and `column`, when present in both.
    fn transition(&self, column: usize) -> Option<(usize, usize)> {
        match (self.before_last, self.last) {
            (Some(prev), Some(cur)) if cur.column == column && prev.column + 1 == column => {
                Some((prev.position, cur.position))
            }
            _ => None,
        }
    }
}

/// A run of one author's characters, inclusive positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rectangle {
    /// Author.
    pub author: AuthorId,
    /// First position.
    pub upper: usize,
    /// Last position.
    pub lower: usize,
}

/// Characters carried from one column to the next at a constant offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parallelogram {
    /// Author.
    pub author: AuthorId,
    /// First position in the earlier column.
    pub upper_left: usize,
    /// Last position in the earlier column.
    pub lower_left: usize,
    /// First position in the later column.
    pub upper_right: usize,
    /// Last position in the later column.
    pub lower_right: usize,
}

/// The document at the end of one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineColumn {
    /// Day, `YYYY-MM-DD`.
    pub date: String,
    /// Author runs.
    pub rectangles: Vec<Rectangle>,
    /// Transitions into the next column. Absent when nothing survived or
    /// there is no next column yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelograms: Option<Vec<Parallelogram>>,
}

/// Mark `list` as column `index` and return the column, plus the
/// parallelograms linking it to the previous column.
fn snapshot(
    list: &mut DocumentList<TimelineMeta>,
    index: usize,
    date: NaiveDate,
) -> (TimelineColumn, Option<Vec<Parallelogram>>) {
    let rectangles = detect_runs(list, |node| node.author.clone(), |_| None::<()>)
        .into_iter()
        .map(|run| Rectangle {
            upper: run.start,
            lower: run.end(),
            author: run.value,
        })
        .collect();

    let ids: Vec<_> = list.ids().collect();
    for (position, id) in ids.into_iter().enumerate() {
        if let Some(node) = list.get_mut(id) {
            node.meta.mark(index, position);
        }
    }

    let mut parallelograms: Vec<Parallelogram> = Vec::new();
    if index > 0 {
        for node in list.iter() {
            let Some((left, right)) = node.meta.transition(index) else {
                continue;
            };
            match parallelograms.last_mut() {
                Some(p)
                    if p.author == node.author
                        && p.upper_left as i64 - p.upper_right as i64
                            == left as i64 - right as i64 =>
                {
                    p.lower_left = left;
                    p.lower_right = right;
                }
                _ => parallelograms.push(Parallelogram {
                    author: node.author.clone(),
                    upper_left: left,
                    lower_left: left,
                    upper_right: right,
                    lower_right: right,
                }),
            }
        }
    }

    let column = TimelineColumn {
        date: date.to_string(),
        rectangles,
        parallelograms: None,
    };
    (column, (!parallelograms.is_empty()).then_some(parallelograms))
}

/// Incremental timeline of one document.
#[derive(Debug, Clone)]
pub struct TimelineAnalyzer {
    replay: DocumentReplay<TimelineMeta>,
    selector: StableTimestampSelector,
    utc_offset_minutes: i32,
    first_day: Option<NaiveDate>,
    columns: Vec<TimelineColumn>,
}

impl TimelineAnalyzer {
    /// Create a timeline for `pad` with days in the given UTC offset.
    pub fn new(pad: impl Into<String>, utc_offset_minutes: i32) -> Self {
        Self::with_metrics(pad, utc_offset_minutes, Arc::new(NoOpMetrics))
    }

    /// Create a timeline reporting replay anomalies to `metrics`.
    pub fn with_metrics(
        pad: impl Into<String>,
        utc_offset_minutes: i32,
        metrics: Arc<dyn ReplayMetrics>,
    ) -> Self {
        Self {
            replay: DocumentReplay::with_metrics(pad, metrics),
            selector: StableTimestampSelector::calendar_day(utc_offset_minutes),
            utc_offset_minutes,
            first_day: None,
            columns: Vec::new(),
        }
    }

    fn day(&self, ts: Timestamp) -> Result<NaiveDate, TimelineError> {
        calendar_day(ts, self.utc_offset_minutes).ok_or(TimelineError::UnrepresentableTimestamp(ts))
    }

    /// Build permanent columns for every finished day. Returns how many
    /// columns were added.
    pub fn advance(
        &mut self,
        revisions: &[Revision],
        pool: &AttributePool,
        now: Timestamp,
    ) -> Result<usize, TimelineError> {
        let Some(first) = revisions.first() else {
            return Ok(0);
        };
        let first_day = match self.first_day {
            Some(day) => day,
            None => {
                let day = self.day(first.timestamp)?;
                self.first_day = Some(day);
                day
            }
        };
        let today = self.day(now)?;

        let timestamps: Vec<Timestamp> = revisions.iter().map(|r| r.timestamp).collect();
        self.selector.select(&timestamps, now);

        let mut added = 0;
        loop {
            let Some(date) = first_day.checked_add_days(Days::new(self.columns.len() as u64))
            else {
                break;
            };
            if date >= today {
                break;
            }
            let offset = self.utc_offset_minutes;
            let points = self.selector.points();
            let through = points
                .partition_point(|p| calendar_day(p.timestamp, offset).is_some_and(|d| d <= date));
            let last_point = through.checked_sub(1).map(|i| points[i]);
            if let Some(point) = last_point {
                self.replay_through(revisions, pool, point.index)?;
            }

            let index = self.columns.len();
            let (column, transitions) = snapshot(self.replay.list_mut(), index, date);
            if let Some(previous) = self.columns.last_mut() {
                previous.parallelograms = transitions;
            }
            self.columns.push(column);
            added += 1;
        }

        if added > 0 {
            tracing::debug!(
                pad = %self.replay.pad(),
                added,
                columns = self.columns.len(),
                last_applied = ?self.replay.last_applied(),
                "timeline columns built"
            );
        }
        Ok(added)
    }

    fn replay_through(
        &mut self,
        revisions: &[Revision],
        pool: &AttributePool,
        limit: RevisionIndex,
    ) -> Result<(), ReplayError> {
        let start = self.replay.next_index();
        for revision in revisions
            .iter()
            .skip(start as usize)
            .take_while(|r| r.index <= limit)
        {
            self.replay.apply(revision, pool, &mut PlainHooks)?;
        }
        Ok(())
    }

    /// Permanent columns plus a provisional column for today.
    ///
    /// Call [`advance`](Self::advance) first. The provisional column is built
    /// on a copy of the document replayed to the latest revision.
    pub fn columns(
        &self,
        revisions: &[Revision],
        pool: &AttributePool,
        now: Timestamp,
    ) -> Result<Vec<TimelineColumn>, TimelineError> {
        let mut out = self.columns.clone();
        if revisions.is_empty() {
            return Ok(out);
        }
        let today = self.day(now)?;

        let mut provisional = self.replay.clone();
        let start = provisional.next_index() as usize;
        for revision in revisions.iter().skip(start) {
            provisional.apply(revision, pool, &mut PlainHooks)?;
        }
        let (column, transitions) = snapshot(provisional.list_mut(), out.len(), today);
        if let Some(previous) = out.last_mut() {
            previous.parallelograms = transitions;
        }
        out.push(column);
        Ok(out)
    }

    /// Permanent columns only.
    pub fn permanent_columns(&self) -> &[TimelineColumn] {
        &self.columns
    }

    /// Last revision applied to the permanent document.
    pub fn last_applied(&self) -> Option<RevisionIndex> {
        self.replay.last_applied()
    }
}
