//! Bounded, deadline-gated job admission
//!
//! Candidates are admitted one at a time: first a worker slot is acquired,
//! then the deadline monitor is asked. Once admission closes the remaining
//! candidates are counted as skipped and the dispatcher only waits for the
//! jobs already running.

use crate::core::{
    DeadlineMonitor, ResultAggregator, TransferJob, TransferResult, TransferWorker,
};
use crate::storage::ObjectDescriptor;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

/// Counters describing one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Jobs created and run
    pub admitted: u64,
    /// Candidates dropped because admission closed
    pub skipped_by_deadline: u64,
    /// Jobs whose worker panicked
    pub panicked: u64,
}

/// Feeds candidates to a fixed-size pool of transfer workers
pub struct WorkDispatcher {
    worker: TransferWorker,
    monitor: DeadlineMonitor,
    pool_size: usize,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl WorkDispatcher {
    /// Create a dispatcher running at most `pool_size` jobs at once
    pub fn new(worker: TransferWorker, monitor: DeadlineMonitor, pool_size: usize) -> Self {
        Self {
            worker,
            monitor,
            pool_size: pool_size.max(1),
        }
    }

    /// Configured pool size
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Run every admissible candidate and record all outcomes
    ///
    /// Returns once every admitted job has reached a terminal state.
    pub async fn dispatch<I>(&self, candidates: I, aggregator: &ResultAggregator) -> DispatchStats
    where
        I: IntoIterator<Item = ObjectDescriptor>,
    {
        let slots = Arc::new(Semaphore::new(self.pool_size));
        let mut jobs: JoinSet<TransferResult> = JoinSet::new();
        let mut stats = DispatchStats::default();
        let mut candidates = candidates.into_iter();

        tracing::debug!(
            pool_size = self.pool_size,
            admission_left = %humantime::format_duration(self.monitor.remaining()),
            "Dispatching candidates"
        );

        while let Some(descriptor) = candidates.next() {
            while let Some(joined) = jobs.try_join_next() {
                Self::collect(joined, aggregator, &mut stats);
            }

            let Ok(permit) = slots.clone().acquire_owned().await else {
                break;
            };

            if !self.monitor.may_admit() {
                drop(permit);
                let skipped = 1 + candidates.by_ref().count() as u64;
                stats.skipped_by_deadline += skipped;
                aggregator.record_deadline_skips(skipped);
                tracing::warn!(
                    skipped,
                    in_flight = jobs.len(),
                    admitted = stats.admitted,
                    "Admission window closed; remaining candidates skipped"
                );
                break;
            }

            stats.admitted += 1;
            let worker = self.worker.clone();
            jobs.spawn(async move {
                let _permit = permit;
                let fallback = descriptor.clone();
                match AssertUnwindSafe(worker.run(TransferJob::new(descriptor)))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(payload) => {
                        TransferResult::panicked(&fallback, panic_message(payload.as_ref()))
                    }
                }
            });
        }

        tracing::debug!(in_flight = jobs.len(), "Draining worker pool");
        while let Some(joined) = jobs.join_next().await {
            Self::collect(joined, aggregator, &mut stats);
        }

        tracing::info!(
            admitted = stats.admitted,
            skipped_by_deadline = stats.skipped_by_deadline,
            panicked = stats.panicked,
            "Dispatch complete"
        );
        stats
    }

    fn collect(
        joined: Result<TransferResult, JoinError>,
        aggregator: &ResultAggregator,
        stats: &mut DispatchStats,
    ) {
        let result = match joined {
            Ok(result) => result,
            Err(err) => {
                // Only reachable if the runtime cancels the task; the key is gone with it
                tracing::error!(error = %err, "Worker task lost");
                TransferResult::panicked(&ObjectDescriptor::new("<unknown>", 0), err.to_string())
            }
        };

        if matches!(result.error, Some(crate::error::ArchiveError::WorkerPanic { .. })) {
            stats.panicked += 1;
            tracing::error!(key = %result.key, "Worker panicked");
        }
        aggregator.record(result);
    }
}
