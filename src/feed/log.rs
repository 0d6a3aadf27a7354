//! Gap-free prefix of a document's revisions.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::FeedError;
use crate::policy::AnalyticsPolicyV1;
use crate::store::RevisionSource;
use crate::types::{
    Anomaly, AnomalyKind, AttributePool, ReplayMetrics, Revision, RevisionIndex,
};

/// Outcome of one [`RevisionLog::sync`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Revisions appended.
    pub fetched: usize,
    /// Pool entries appended.
    pub pool_entries_added: usize,
    /// Head reported by the source.
    pub head: Option<RevisionIndex>,
    /// Revision that stayed missing after every retry.
    pub gap: Option<RevisionIndex>,
}

/// Revisions `0..n` of one document plus its attribute pool.
pub struct RevisionLog {
    pad: String,
    revisions: Vec<Revision>,
    pool: AttributePool,
    known_head: Option<RevisionIndex>,
    gap: Option<RevisionIndex>,
    metrics: Arc<dyn ReplayMetrics>,
}

impl std::fmt::Debug for RevisionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionLog")
            .field("pad", &self.pad)
            .field("revisions", &self.revisions.len())
            .field("pool", &self.pool.len())
            .field("known_head", &self.known_head)
            .field("gap", &self.gap)
            .finish()
    }
}

impl RevisionLog {
    /// Empty log for `pad`.
    pub fn new(pad: impl Into<String>, metrics: Arc<dyn ReplayMetrics>) -> Self {
        Self {
            pad: pad.into(),
            revisions: Vec::new(),
            pool: AttributePool::new(),
            known_head: None,
            gap: None,
            metrics,
        }
    }

    /// Fetch the pool and every revision up to the source's head.
    ///
    /// A missing revision is retried with exponential backoff. When it stays
    /// missing the sync stops there and reports the gap; the next sync tries
    /// again.
    pub async fn sync<S: RevisionSource + ?Sized>(
        &mut self,
        source: &S,
        policy: &AnalyticsPolicyV1,
    ) -> Result<SyncReport, FeedError> {
        let mut report = SyncReport::default();

        let pool = source
            .attribute_pool(&self.pad)
            .await
            .map_err(FeedError::from_store)?;
        report.pool_entries_added = self.pool.absorb(&pool);

        let head = source.head(&self.pad).await.map_err(FeedError::from_store)?;
        self.known_head = head;
        report.head = head;
        self.gap = None;
        let Some(head) = head else {
            return Ok(report);
        };

        loop {
            let next = self.next_index();
            if next > head {
                break;
            }
            let batch = source
                .revisions(&self.pad, next..head + 1)
                .await
                .map_err(FeedError::from_store)?;
            let appended = self.extend(batch);
            report.fetched += appended;
            if appended > 0 {
                continue;
            }

            match self.fetch_with_retry(source, next, policy).await? {
                Some(revision) if revision.index == next => {
                    self.revisions.push(revision);
                    report.fetched += 1;
                }
                _ => {
                    self.report_missing(next, policy.fetch_retry_attempts);
                    self.gap = Some(next);
                    report.gap = Some(next);
                    break;
                }
            }
        }

        if report.fetched > 0 {
            tracing::debug!(
                pad = %self.pad,
                fetched = report.fetched,
                head,
                "revision log synced"
            );
        }
        Ok(report)
    }

    async fn fetch_with_retry<S: RevisionSource + ?Sized>(
        &self,
        source: &S,
        index: RevisionIndex,
        policy: &AnalyticsPolicyV1,
    ) -> Result<Option<Revision>, FeedError> {
        for attempt in 0..policy.fetch_retry_attempts {
            let delay = policy
                .fetch_retry_base_delay_ms
                .saturating_mul(1u64 << attempt.min(16));
            tracing::debug!(pad = %self.pad, revision = index, attempt, delay_ms = delay, "revision missing, retrying");
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if let Some(revision) = source
                .revision(&self.pad, index)
                .await
                .map_err(FeedError::from_store)?
            {
                return Ok(Some(revision));
            }
        }
        Ok(None)
    }

    fn extend(&mut self, batch: Vec<Revision>) -> usize {
        let mut appended = 0;
        for revision in batch {
            if revision.index != self.next_index() {
                tracing::warn!(
                    pad = %self.pad,
                    expected = self.next_index(),
                    got = revision.index,
                    "source returned revisions out of order"
                );
                break;
            }
            self.revisions.push(revision);
            appended += 1;
        }
        appended
    }

    fn report_missing(&self, index: RevisionIndex, attempts: u32) {
        let anomaly = Anomaly::new(
            AnomalyKind::MissingRevision {
                revision: index,
                attempts,
            },
            &self.pad,
        );
        anomaly.log();
        self.metrics.record_anomaly(&anomaly);
    }

    /// Index of the next revision to fetch.
    pub fn next_index(&self) -> RevisionIndex {
        self.revisions.len() as RevisionIndex
    }

    /// Fetched revisions, starting at index 0.
    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    /// Latest attribute pool.
    pub fn pool(&self) -> &AttributePool {
        &self.pool
    }

    /// Head reported by the last sync.
    pub fn known_head(&self) -> Option<RevisionIndex> {
        self.known_head
    }

    /// Last fetched revision.
    pub fn last_index(&self) -> Option<RevisionIndex> {
        self.revisions.last().map(|r| r.index)
    }

    /// Revision the last sync could not fetch.
    pub fn gap(&self) -> Option<RevisionIndex> {
        self.gap
    }

    /// Pad name.
    pub fn pad(&self) -> &str {
        &self.pad
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRevisionStore;
    use crate::types::{NoOpMetrics, TestMetrics, AUTHOR_KEY};

    fn fast_policy() -> AnalyticsPolicyV1 {
        AnalyticsPolicyV1 {
            fetch_retry_attempts: 2,
            fetch_retry_base_delay_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sync_fetches_everything() {
        let store = InMemoryRevisionStore::new();
        store.push_attribute("pad", AUTHOR_KEY, "a");
        store.append_revision("pad", "a", 0, 1, 2, "+1*0", "x");
        store.append_revision("pad", "a", 1, 2, 3, "=1+1*0", "y");

        let mut log = RevisionLog::new("pad", Arc::new(NoOpMetrics));
        let report = log.sync(&store, &fast_policy()).await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.pool_entries_added, 1);
        assert_eq!(report.head, Some(1));
        assert_eq!(log.last_index(), Some(1));

        store.append_revision("pad", "a", 2, 3, 4, "=2+1*0", "z");
        let report = log.sync(&store, &fast_policy()).await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.pool_entries_added, 0);
        assert_eq!(log.revisions().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_pad_is_empty() {
        let store = InMemoryRevisionStore::new();
        let mut log = RevisionLog::new("nobody", Arc::new(NoOpMetrics));
        let report = log.sync(&store, &fast_policy()).await.unwrap();
        assert_eq!(report, SyncReport::default());
        assert!(log.revisions().is_empty());
    }

    #[tokio::test]
    async fn test_gap_stops_sync_and_is_reported() {
        let store = InMemoryRevisionStore::new();
        store
            .insert_revision("pad", Revision::new(0, "a", 0, 1, 2, "+1", "x"))
            .unwrap();
        store
            .insert_revision("pad", Revision::new(2, "a", 0, 3, 4, "=2+1", "z"))
            .unwrap();

        let metrics = Arc::new(TestMetrics::default());
        let mut log = RevisionLog::new("pad", metrics.clone());
        let report = log.sync(&store, &fast_policy()).await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.gap, Some(1));
        assert_eq!(log.gap(), Some(1));
        assert_eq!(metrics.get_count("pad_replay_missing_revision_total"), 1);

        // The gap fills in later.
        store
            .insert_revision("pad", Revision::new(1, "a", 0, 2, 3, "=1+1", "y"))
            .unwrap();
        let report = log.sync(&store, &fast_policy()).await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.gap, None);
        assert_eq!(log.last_index(), Some(2));
    }
}
