//! Run summary accumulation
//!
//! Every listed object lands in exactly one of copied, failed,
//! skipped-by-filter or skipped-by-deadline. `deleted` counts the copied
//! objects whose source was removed; `needs_cleanup` counts the failed ones
//! that were copied and verified but kept their source.

use crate::core::{FailureKind, JobStatus, TransferResult};
use crate::progress::ProgressReporter;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// One failed object in the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Object key
    pub object_id: String,
    /// Error message
    pub error_reason: String,
    /// Error category (transient, permanent, verification, panic, ...)
    pub category: String,
    /// Whether a re-run will pick the object up
    pub kind: FailureKind,
}

/// Final outcome of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    /// Objects examined by the lister
    pub listed: u64,
    /// Objects copied and verified
    pub copied: u64,
    /// Copied objects whose source was deleted
    pub deleted: u64,
    /// Objects rejected by the request filters
    ///
    /// Only listed objects count. With key prefixes set, the backend lists
    /// just those prefixes, so objects outside them are neither listed nor
    /// counted here.
    pub skipped_by_filter: u64,
    /// Candidates not admitted before the deadline
    pub skipped_by_deadline: u64,
    /// Objects that reached `Failed`
    pub failed: u64,
    /// Failed objects that were copied but whose source remains
    pub needs_cleanup: u64,
    /// Bytes copied
    pub bytes_archived: u64,
    /// Wall time from start to drain, in seconds
    pub elapsed_secs: f64,
    /// Failed objects, ordered by key
    pub failures: Vec<FailureRecord>,
}

impl Summary {
    /// Sum of the disjoint categories
    pub fn total(&self) -> u64 {
        self.copied + self.failed + self.skipped_by_filter + self.skipped_by_deadline
    }

    /// True when every listed object is accounted for
    pub fn is_complete(&self) -> bool {
        self.total() == self.listed
    }

    /// Failures a plain re-run will retry
    pub fn recoverable(&self) -> u64 {
        self.failed - self.needs_cleanup
    }

    /// True when the admission window closed before the listing was exhausted
    pub fn deadline_reached(&self) -> bool {
        self.skipped_by_deadline > 0
    }

    /// Elapsed time as a `Duration`
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed_secs.max(0.0))
    }

    /// Print a human-readable summary to stdout
    pub fn print_summary(&self) {
        use humansize::{format_size, BINARY};

        println!("Archive Summary");
        println!("===============");
        println!("Listed:              {}", self.listed);
        println!("Copied:              {}", self.copied);
        println!("Deleted:             {}", self.deleted);
        println!("Skipped (filter):    {}", self.skipped_by_filter);
        println!("Skipped (deadline):  {}", self.skipped_by_deadline);
        println!(
            "Failed:              {} ({} recoverable, {} need cleanup)",
            self.failed,
            self.recoverable(),
            self.needs_cleanup
        );
        println!("Data archived:       {}", format_size(self.bytes_archived, BINARY));
        println!(
            "Elapsed:             {}",
            humantime::format_duration(Duration::from_millis(self.elapsed().as_millis() as u64))
        );

        if !self.failures.is_empty() {
            println!();
            println!("Failures:");
            for failure in &self.failures {
                println!("  {} [{}] {}", failure.object_id, failure.kind, failure.error_reason);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    summary: Summary,
    handled: u64,
}

/// Thread-safe accumulator of transfer outcomes
pub struct ResultAggregator {
    state: Mutex<Tally>,
    started: Instant,
    progress_interval: u64,
    progress: Option<Arc<ProgressReporter>>,
}

impl ResultAggregator {
    /// Create an aggregator logging a progress line every `progress_interval` results
    pub fn new(progress_interval: u64) -> Self {
        Self {
            state: Mutex::new(Tally::default()),
            started: Instant::now(),
            progress_interval: progress_interval.max(1),
            progress: None,
        }
    }

    /// Also feed a terminal progress reporter
    pub fn with_progress(mut self, progress: Arc<ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Tally> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record how many objects the lister examined
    pub fn record_listed(&self, count: u64) {
        self.lock().summary.listed += count;
    }

    /// Record objects rejected by the filters
    pub fn record_filtered(&self, count: u64) {
        self.lock().summary.skipped_by_filter += count;
    }

    /// Record candidates never admitted because the deadline closed
    pub fn record_deadline_skips(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.lock().summary.skipped_by_deadline += count;
        if let Some(progress) = &self.progress {
            progress.jobs_skipped(count);
        }
    }

    /// Record one terminal job
    pub fn record(&self, result: TransferResult) {
        let mut tally = self.lock();
        let summary = &mut tally.summary;

        match result.status {
            JobStatus::Done => {
                summary.copied += 1;
                summary.bytes_archived += result.bytes;
                if result.source_deleted {
                    summary.deleted += 1;
                }
            }
            JobStatus::Skipped => summary.skipped_by_deadline += 1,
            _ => {
                let kind = result.failure_kind.unwrap_or(FailureKind::Recoverable);
                summary.failed += 1;
                if kind == FailureKind::NeedsCleanup {
                    summary.needs_cleanup += 1;
                }
                summary.failures.push(FailureRecord {
                    object_id: result.key.clone(),
                    error_reason: result
                        .error_reason()
                        .unwrap_or_else(|| format!("ended in state {}", result.status)),
                    category: result
                        .error
                        .as_ref()
                        .map(|e| e.category().to_string())
                        .unwrap_or_else(|| "internal".to_string()),
                    kind,
                });
            }
        }

        tally.handled += 1;
        if tally.handled % self.progress_interval == 0 {
            let summary = &tally.summary;
            tracing::info!(
                handled = tally.handled,
                copied = summary.copied,
                deleted = summary.deleted,
                failed = summary.failed,
                bytes = %humansize::format_size(summary.bytes_archived, humansize::BINARY),
                "Progress"
            );
        }
        drop(tally);

        if let Some(progress) = &self.progress {
            progress.job_finished(result.is_done(), result.bytes);
        }
    }

    /// Finalize the summary
    pub fn finish(self) -> Summary {
        let started = self.started;
        let tally = self
            .state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);

        let mut summary = tally.summary;
        summary.elapsed_secs = started.elapsed().as_secs_f64();
        summary.failures.sort_by(|a, b| a.object_id.cmp(&b.object_id));

        if !summary.is_complete() {
            tracing::error!(
                listed = summary.listed,
                accounted = summary.total(),
                "Summary does not account for every listed object"
            );
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ArchiveError, StorageError, StorageErrorKind, VerificationFailure};
    use crate::storage::StorageOp;

    fn done(key: &str, bytes: u64, deleted: bool) -> TransferResult {
        TransferResult {
            key: key.to_string(),
            status: JobStatus::Done,
            error: None,
            failure_kind: None,
            attempts: 1,
            backend_calls: if deleted { 3 } else { 2 },
            bytes,
            verified: true,
            source_deleted: deleted,
        }
    }

    fn failed(key: &str, error: ArchiveError, kind: FailureKind) -> TransferResult {
        TransferResult {
            key: key.to_string(),
            status: JobStatus::Failed,
            error: Some(error),
            failure_kind: Some(kind),
            attempts: 1,
            backend_calls: 1,
            bytes: 10,
            verified: kind == FailureKind::NeedsCleanup,
            source_deleted: false,
        }
    }

    #[test]
    fn test_categories_sum_to_listed() {
        let aggregator = ResultAggregator::new(1000);
        aggregator.record_listed(7);
        aggregator.record_filtered(2);

        aggregator.record(done("a", 100, true));
        aggregator.record(done("b", 50, false));
        aggregator.record(failed(
            "c",
            ArchiveError::verification("c", VerificationFailure::Missing),
            FailureKind::Recoverable,
        ));
        aggregator.record(failed(
            "d",
            ArchiveError::Permanent {
                operation: StorageOp::Delete,
                key: "d".into(),
                source: StorageError::new(StorageErrorKind::PermissionDenied, "403"),
            },
            FailureKind::NeedsCleanup,
        ));
        aggregator.record_deadline_skips(1);

        let summary = aggregator.finish();
        assert_eq!(summary.copied, 2);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.needs_cleanup, 1);
        assert_eq!(summary.recoverable(), 1);
        assert_eq!(summary.skipped_by_deadline, 1);
        assert_eq!(summary.bytes_archived, 150);
        assert!(summary.deadline_reached());
        assert!(summary.is_complete());

        let ids: Vec<_> = summary.failures.iter().map(|f| f.object_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
        assert_eq!(summary.failures[0].category, "verification");
        assert_eq!(summary.failures[1].kind, FailureKind::NeedsCleanup);
    }

    #[test]
    fn test_summary_json_shape() {
        let aggregator = ResultAggregator::new(1);
        aggregator.record_listed(1);
        aggregator.record(failed(
            "x",
            ArchiveError::verification(
                "x",
                VerificationFailure::SizeMismatch { expected: 10, actual: 3 },
            ),
            FailureKind::Recoverable,
        ));

        let json = serde_json::to_value(aggregator.finish()).unwrap();
        assert_eq!(json["failed"], 1);
        assert_eq!(json["failures"][0]["object_id"], "x");
        assert_eq!(json["failures"][0]["kind"], "recoverable");
        assert!(json["failures"][0]["error_reason"]
            .as_str()
            .unwrap()
            .contains("size mismatch"));
    }

    #[test]
    fn test_concurrent_recording() {
        let aggregator = Arc::new(ResultAggregator::new(10));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        aggregator.record(done(&format!("{}-{}", t, i), 1, false));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let aggregator = Arc::try_unwrap(aggregator).ok().unwrap();
        let summary = aggregator.finish();
        assert_eq!(summary.copied, 200);
        assert_eq!(summary.bytes_archived, 200);
    }
}
