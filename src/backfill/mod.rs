//! Gap detection and repair.
//!
//! A gap is a maximal open interval of revisions, bounded by two revisions
//! present in the store, that holds no record. Nothing is reported above
//! the highest or below the lowest stored revision.
//!
//! Repair replays the remote history of every pending interval from one
//! subscription, through the same idempotent write path the live consumer
//! uses, so backfill and live ingestion may interleave freely. A stored
//! watermark marks how far gaps have been proven, so later runs skip them.


use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::distinct_revisions_descending;
use crate::time::now_as_nanos;
use crate::BackfillConfig;
use crate::BackfillError;
use crate::Error;
use crate::KeyRange;
use crate::NetworkError;
use crate::Result;
use crate::Revision;
use crate::RevisionStore;
use crate::SystemError;
use crate::WatchRequest;
use crate::WatchTransport;
use crate::WriteBatch;

/// Open interval `(low, high)` of missing revisions. Both bounds are stored
/// revisions and `high - low > 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GapInterval {
    pub low: Revision,
    pub high: Revision,
}

impl GapInterval {
    pub fn new(
        low: Revision,
        high: Revision,
    ) -> Self {
        GapInterval { low, high }
    }

    /// Number of revisions missing from the interval.
    pub fn missing(&self) -> i64 {
        self.high - self.low - 1
    }

    pub fn encloses(
        &self,
        other: &GapInterval,
    ) -> bool {
        self.low <= other.low && other.high <= self.high
    }
}

impl fmt::Display for GapInterval {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "({}, {})", self.low, self.high)
    }
}

/// Finds every gap in a descending sequence of distinct revisions.
///
/// Intervals come out highest first.
pub fn detect_gaps<I>(revisions_desc: I) -> Result<Vec<GapInterval>>
where
    I: IntoIterator<Item = Result<Revision>>,
{
    let mut gaps = Vec::new();
    let mut last: Option<Revision> = None;
    for revision in revisions_desc {
        let revision = revision?;
        if let Some(last) = last {
            if last - revision > 1 {
                gaps.push(GapInterval::new(revision, last));
            }
        }
        last = Some(revision);
    }
    Ok(gaps)
}

/// Scans `store` for gaps.
pub fn scan_gaps<S: RevisionStore + ?Sized>(store: &S) -> Result<Vec<GapInterval>> {
    detect_gaps(distinct_revisions_descending(store))
}

/// Index of the interval of `intervals_asc` that strictly contains
/// `revision`.
fn containing(
    intervals_asc: &[GapInterval],
    revision: Revision,
) -> Option<usize> {
    let idx = intervals_asc.partition_point(|i| i.high <= revision);
    intervals_asc
        .get(idx)
        .filter(|i| i.low < revision)
        .map(|_| idx)
}

/// How a replay subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// An event at or above the upper bound of the last interval arrived, so
    /// every interval was replayed
    Complete,
    /// The stream ended or went idle first
    Incomplete,
    /// The start of the replay was compacted on the remote store
    Compacted { compact_revision: Revision },
    /// Cancelled by shutdown
    Cancelled,
}

/// Result of one replay subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayPass {
    pub outcome: ReplayOutcome,
    /// Intervals whose upper bound the stream reached, ascending
    pub completed: Vec<GapInterval>,
    pub records_inserted: usize,
}

/// Result of one backfill pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Gaps found by the initial scan
    pub detected: Vec<GapInterval>,
    /// Gaps below the stored watermark, proven by an earlier pass and not
    /// replayed again
    pub proven_earlier: Vec<GapInterval>,
    /// Intervals whose remote history was fully replayed
    pub replayed: Vec<GapInterval>,
    /// Gaps left after replay
    pub unresolved: Vec<GapInterval>,
    pub records_inserted: usize,
    /// Replay subscriptions opened
    pub subscriptions: usize,
}

pub struct BackfillPlanner {
    store: Arc<dyn RevisionStore>,
    transport: Arc<dyn WatchTransport>,
    range: KeyRange,
    config: BackfillConfig,
}

impl BackfillPlanner {
    pub fn new(
        store: Arc<dyn RevisionStore>,
        transport: Arc<dyn WatchTransport>,
        range: KeyRange,
        config: BackfillConfig,
    ) -> Self {
        Self {
            store,
            transport,
            range,
            config,
        }
    }

    /// Detects gaps and replays the ones above the backfill watermark.
    ///
    /// All pending intervals share one replay subscription starting below
    /// the lowest of them. Compaction drops the intervals it covers and the
    /// rest are replayed from a new subscription.
    ///
    /// An interval counts as repaired when it no longer holds a gap, or when
    /// the replay reached its upper bound: the remaining holes are revisions
    /// that touched keys outside the watched range. The watermark then rises
    /// over every repaired interval below the first unrepaired one. Anything
    /// else is returned as [`BackfillError::UnresolvedGaps`].
    #[instrument(skip(self, cancel))]
    pub async fn run(
        &self,
        cancel: CancellationToken,
    ) -> Result<BackfillReport> {
        let mut report = BackfillReport {
            detected: scan_gaps(self.store.as_ref())?,
            ..Default::default()
        };
        if report.detected.is_empty() {
            info!("no revision gaps detected");
            return Ok(report);
        }

        let watermark = self.store.backfill_watermark()?;
        let (proven_earlier, pending): (Vec<GapInterval>, Vec<GapInterval>) = report
            .detected
            .iter()
            .rev()
            .copied()
            .partition(|interval| interval.high <= watermark);
        report.proven_earlier = proven_earlier;
        if !report.proven_earlier.is_empty() {
            info!(
                watermark,
                "{} gaps were proven by an earlier backfill",
                report.proven_earlier.len()
            );
        }
        if pending.is_empty() {
            return Ok(report);
        }
        info!(
            "{} revision gaps to repair, {} revisions missing",
            pending.len(),
            pending.iter().map(GapInterval::missing).sum::<i64>()
        );

        if !self.config.enabled {
            warn!("backfill disabled, gaps left unrepaired");
            report.unresolved = pending.into_iter().rev().collect();
            return Err(BackfillError::UnresolvedGaps(report.unresolved).into());
        }

        let mut remaining = pending.clone();
        while !remaining.is_empty() && !cancel.is_cancelled() {
            let pass = self.replay(&remaining, &cancel).await?;
            report.subscriptions += 1;
            report.records_inserted += pass.records_inserted;
            remaining.drain(..pass.completed.len());
            report.replayed.extend(pass.completed);

            match pass.outcome {
                ReplayOutcome::Complete | ReplayOutcome::Cancelled => break,
                ReplayOutcome::Incomplete => {
                    for interval in &remaining {
                        warn!(%interval, "replay ended before reaching the upper bound");
                    }
                    break;
                }
                ReplayOutcome::Compacted { compact_revision } => {
                    let lost = remaining
                        .iter()
                        .take_while(|interval| interval.low + 1 < compact_revision)
                        .count()
                        .max(1);
                    for interval in remaining.drain(..lost) {
                        warn!(
                            %interval,
                            compact_revision, "history of interval was compacted on the remote store"
                        );
                    }
                }
            }
        }

        // Each gap left is enclosed by exactly one pending interval.
        let mut still_open = HashSet::new();
        for gap in scan_gaps(self.store.as_ref())? {
            if let Some(idx) = containing(&pending, gap.low + 1) {
                still_open.insert(pending[idx]);
            }
        }
        let replayed: HashSet<GapInterval> = report.replayed.iter().copied().collect();
        for interval in &report.replayed {
            if still_open.contains(interval) {
                info!(%interval, "interval replayed; remaining revisions are outside the watched range");
            }
        }
        let is_unresolved =
            |interval: &GapInterval| !replayed.contains(interval) && still_open.contains(interval);
        report.unresolved = pending
            .iter()
            .rev()
            .filter(|interval| is_unresolved(*interval))
            .copied()
            .collect();

        let proven_to = pending
            .iter()
            .take_while(|interval| !is_unresolved(*interval))
            .last()
            .map(|interval| interval.high);
        if let Some(proven_to) = proven_to.filter(|rev| *rev > watermark) {
            self.store.record_backfill_watermark(proven_to)?;
            debug!(proven_to, "backfill watermark raised");
        }

        info!(
            replayed = report.replayed.len(),
            unresolved = report.unresolved.len(),
            records_inserted = report.records_inserted,
            subscriptions = report.subscriptions,
            "backfill finished"
        );
        if !report.unresolved.is_empty() {
            return Err(BackfillError::UnresolvedGaps(report.unresolved).into());
        }
        Ok(report)
    }

    /// Replays the remote history of `intervals` (ascending, non-empty) from
    /// one subscription starting just above the lowest of them.
    ///
    /// Only events strictly inside an interval are written. An interval is
    /// completed once an event at or above its upper bound arrives.
    pub async fn replay(
        &self,
        intervals: &[GapInterval],
        cancel: &CancellationToken,
    ) -> Result<ReplayPass> {
        let mut pass = ReplayPass {
            outcome: ReplayOutcome::Complete,
            completed: Vec::new(),
            records_inserted: 0,
        };
        let Some(first) = intervals.first() else {
            return Ok(pass);
        };
        let request = WatchRequest {
            range: self.range.clone(),
            start_revision: first.low + 1,
            prev_kv: false,
        };
        let idle = Duration::from_millis(self.config.idle_timeout_ms);

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                pass.outcome = ReplayOutcome::Cancelled;
                return Ok(pass);
            }
            stream = self.transport.open(request) => stream?,
        };
        debug!(
            start_revision = first.low + 1,
            intervals = intervals.len(),
            "replaying gaps"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    pass.outcome = ReplayOutcome::Cancelled;
                    return Ok(pass);
                }
                next = tokio::time::timeout(idle, stream.next()) => next,
            };
            let response = match next {
                Err(_) | Ok(None) => {
                    pass.outcome = ReplayOutcome::Incomplete;
                    return Ok(pass);
                }
                Ok(Some(response)) => response?,
            };

            match response.check_canceled() {
                Ok(()) => {}
                Err(Error::System(SystemError::Network(NetworkError::WatchCanceled {
                    compact_revision,
                    ..
                }))) if compact_revision > 0 => {
                    pass.outcome = ReplayOutcome::Compacted { compact_revision };
                    return Ok(pass);
                }
                Err(e) => return Err(e),
            }

            let mut batch = WriteBatch::from_events(&response.events, now_as_nanos());
            batch.retain_revisions(|rev| containing(intervals, rev).is_some());
            if !batch.is_empty() {
                pass.records_inserted += self.store.apply_batch(&batch)?.records_inserted;
            }

            let Some(newest) = response.events.iter().map(|e| e.revision()).max() else {
                continue;
            };
            let reached = intervals.partition_point(|i| i.high <= newest);
            if reached > pass.completed.len() {
                pass.completed.extend_from_slice(&intervals[pass.completed.len()..reached]);
            }
            if pass.completed.len() == intervals.len() {
                return Ok(pass);
            }
        }
    }
}
