//! Quiescence detection over revision timestamps.
//!
//! A revision is *stable* when nobody edited the document for a while after
//! it. Expensive analytics only evaluate at stable revisions, so each pass
//! sees a document that was at rest.
//!
//! The selector is incremental: each call scans only revisions it has not
//! decided yet, and never emits a timestamp twice.

use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{RevisionIndex, Timestamp};

/// How long a document has to be at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StabilityWindow {
    /// No revision for more than `ms` milliseconds.
    Idle {
        /// Idle window in milliseconds.
        ms: i64,
    },
    /// No further revision on the same calendar day.
    CalendarDay {
        /// Offset of the local day from UTC.
        utc_offset_minutes: i32,
    },
}

impl StabilityWindow {
    /// Stable given the timestamp of the following revision.
    fn followed_by(&self, ts: Timestamp, next: Timestamp) -> bool {
        match *self {
            Self::Idle { ms } => next - ts > ms,
            Self::CalendarDay { utc_offset_minutes } => {
                calendar_day(next, utc_offset_minutes) > calendar_day(ts, utc_offset_minutes)
            }
        }
    }

    /// Stable as the latest revision, given the current time.
    fn settled(&self, ts: Timestamp, now: Timestamp) -> bool {
        match *self {
            Self::Idle { ms } => now > ts + ms,
            Self::CalendarDay { utc_offset_minutes } => {
                calendar_day(now, utc_offset_minutes) > calendar_day(ts, utc_offset_minutes)
            }
        }
    }
}

/// Local calendar day of a millisecond timestamp.
///
/// `None` for timestamps or offsets chrono cannot represent.
pub fn calendar_day(ts: Timestamp, utc_offset_minutes: i32) -> Option<NaiveDate> {
    let offset = FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?;
    let instant = Utc.timestamp_millis_opt(ts).single()?;
    Some(instant.with_timezone(&offset).date_naive())
}

/// A chosen stable revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StablePoint {
    /// Revision index.
    pub index: RevisionIndex,
    /// Revision timestamp.
    pub timestamp: Timestamp,
}

/// Incremental stable timestamp selection.
#[derive(Debug, Clone)]
pub struct StableTimestampSelector {
    window: StabilityWindow,
    points: Vec<StablePoint>,
    next_scan: usize,
}

impl StableTimestampSelector {
    /// Create a selector for `window`.
    pub fn new(window: StabilityWindow) -> Self {
        Self {
            window,
            points: Vec::new(),
            next_scan: 0,
        }
    }

    /// Idle-window selector.
    pub fn idle(ms: i64) -> Self {
        Self::new(StabilityWindow::Idle { ms })
    }

    /// Calendar-day selector.
    pub fn calendar_day(utc_offset_minutes: i32) -> Self {
        Self::new(StabilityWindow::CalendarDay { utc_offset_minutes })
    }

    /// Scan revisions not decided yet and return the newly chosen points.
    ///
    /// `timestamps[i]` is the timestamp of revision `i`; the slice may only
    /// grow between calls. A revision with a successor is decided for good.
    /// The latest revision stays undecided until `now` settles it.
    pub fn select(&mut self, timestamps: &[Timestamp], now: Timestamp) -> Vec<StablePoint> {
        let mut chosen = Vec::new();
        while self.next_scan < timestamps.len() {
            let i = self.next_scan;
            let ts = timestamps[i];
            let stable = match timestamps.get(i + 1) {
                Some(&next) => self.window.followed_by(ts, next),
                None if self.window.settled(ts, now) => true,
                None => break,
            };
            if stable {
                let point = StablePoint {
                    index: i as RevisionIndex,
                    timestamp: ts,
                };
                if self.points.last().map_or(true, |last| ts > last.timestamp) {
                    self.points.push(point);
                    chosen.push(point);
                }
            }
            self.next_scan += 1;
        }
        if !chosen.is_empty() {
            tracing::debug!(
                window = ?self.window,
                chosen = chosen.len(),
                scanned = self.next_scan,
                "stable timestamps selected"
            );
        }
        chosen
    }

    /// Every point chosen so far, ascending.
    pub fn points(&self) -> &[StablePoint] {
        &self.points
    }

    /// Most recent chosen point.
    pub fn latest(&self) -> Option<StablePoint> {
        self.points.last().copied()
    }

    /// True when revision `index` was chosen.
    pub fn is_stable_index(&self, index: RevisionIndex) -> bool {
        self.points
            .binary_search_by_key(&index, |p| p.index)
            .is_ok()
    }

    /// Window this selector applies.
    pub fn window(&self) -> StabilityWindow {
        self.window
    }

    /// Number of revisions decided so far.
    pub fn scanned(&self) -> usize {
        self.next_scan
    }
}
