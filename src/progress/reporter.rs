//! Progress reporter implementation
//!
//! Uses indicatif for terminal progress bars with:
//! - Object count progress (archived, failed, skipped)
//! - Byte progress with throughput and ETA
//! - A status line for the current phase

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

fn style(template: &str, fallback: ProgressStyle) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .map(|s| s.progress_chars("=> "))
        .unwrap_or(fallback)
}

/// Progress reporter for archive runs
pub struct ProgressReporter {
    /// Multi-progress container
    multi: MultiProgress,
    /// Object count bar
    objects_bar: ProgressBar,
    /// Byte bar
    bytes_bar: ProgressBar,
    /// Current status message
    status: ProgressBar,
    /// Start time
    start_time: Instant,
    /// Objects archived
    archived: AtomicU64,
    /// Objects failed
    failed: AtomicU64,
    /// Objects skipped by the deadline
    skipped: AtomicU64,
    /// Bytes archived
    bytes: AtomicU64,
    /// Total bytes of all candidates
    total_bytes: AtomicU64,
    /// Is progress enabled
    enabled: AtomicBool,
}

impl ProgressReporter {
    /// Create a new progress reporter drawing to stderr
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let objects_bar = multi.add(ProgressBar::new(0));
        objects_bar.set_style(style(
            "{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} objects ({percent}%) {msg}",
            ProgressStyle::default_bar(),
        ));
        objects_bar.set_prefix("Objects");

        let bytes_bar = multi.add(ProgressBar::new(0));
        bytes_bar.set_style(style(
            "{prefix:.bold.dim} [{bar:40.green/white}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA {eta})",
            ProgressStyle::default_bar(),
        ));
        bytes_bar.set_prefix("Data   ");

        Self {
            multi,
            objects_bar,
            bytes_bar,
            status,
            start_time: Instant::now(),
            archived: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    /// Create a disabled progress reporter (for quiet mode and tests)
    pub fn disabled() -> Self {
        let reporter = Self::new();
        reporter.enabled.store(false, Ordering::SeqCst);
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Size the bars once the listing is known
    pub fn set_totals(&self, objects: u64, bytes: u64) {
        self.total_bytes.store(bytes, Ordering::Relaxed);
        self.objects_bar.set_length(objects);
        self.bytes_bar.set_length(bytes);
    }

    /// Count one finished job
    pub fn job_finished(&self, archived: bool, bytes: u64) {
        if archived {
            self.archived.fetch_add(1, Ordering::Relaxed);
            self.bytes.fetch_add(bytes, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        // Failed bytes still leave the remaining-work estimate
        self.bytes_bar.inc(bytes);
        self.objects_bar.inc(1);
        self.refresh_message();
    }

    /// Count candidates dropped by the deadline
    pub fn jobs_skipped(&self, count: u64) {
        self.skipped.fetch_add(count, Ordering::Relaxed);
        self.objects_bar.inc(count);
        self.refresh_message();
    }

    fn refresh_message(&self) {
        let failed = self.failed.load(Ordering::Relaxed);
        let skipped = self.skipped.load(Ordering::Relaxed);
        if failed > 0 || skipped > 0 {
            self.objects_bar
                .set_message(format!("{} failed, {} skipped", failed, skipped));
        }
    }

    /// Set current status message
    pub fn set_status(&self, msg: &str) {
        self.status.set_message(msg.to_string());
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Bytes archived per second so far
    pub fn throughput(&self) -> f64 {
        let bytes = self.bytes.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            bytes as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Finish progress with success message
    pub fn finish_success(&self, message: &str) {
        self.status.finish_with_message(format!("✓ {}", message));
        self.objects_bar.finish();
        self.bytes_bar.finish();
    }

    /// Finish progress with error message
    pub fn finish_error(&self, message: &str) {
        self.status.finish_with_message(format!("✗ {}", message));
        self.objects_bar.abandon();
        self.bytes_bar.abandon();
    }

    /// Check if progress is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Snapshot of the counters
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            archived: self.archived.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time progress counters
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Objects archived
    pub archived: u64,
    /// Objects failed
    pub failed: u64,
    /// Objects skipped by the deadline
    pub skipped: u64,
    /// Bytes archived
    pub bytes: u64,
    /// Total candidate bytes
    pub total_bytes: u64,
    /// Elapsed time
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Share of candidate bytes archived
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.bytes as f64 / self.total_bytes as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counters() {
        let reporter = ProgressReporter::disabled();
        assert!(!reporter.is_enabled());

        reporter.set_totals(4, 1000);
        reporter.job_finished(true, 500);
        reporter.job_finished(false, 250);
        reporter.jobs_skipped(2);

        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.archived, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.skipped, 2);
        assert_eq!(snapshot.bytes, 500);
        assert_eq!(snapshot.percentage(), 50.0);
    }
}
