//! Per-object copy, verify and delete
//!
//! A [`TransferJob`] carries an explicit [`JobStatus`]; every change goes
//! through [`TransferJob::advance`], which refuses backwards moves and
//! refuses `Deleting` unless the destination was verified first.

use crate::config::ArchiveRequest;
use crate::core::{RetryFailure, RetryPolicy, Retried};
use crate::error::{ArchiveError, VerificationFailure};
use crate::hash::checksums_match;
use crate::storage::{ObjectDescriptor, ObjectMeta, ObjectStore, StorageOp};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a transfer job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, no backend call made yet
    Pending,
    /// Server-side copy in progress
    Copying,
    /// Checking the destination
    Verifying,
    /// Removing the source
    Deleting,
    /// Archived
    Done,
    /// Terminal failure
    Failed,
    /// Not attempted
    Skipped,
}

impl JobStatus {
    /// Check whether this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }

    /// Check whether `next` is a legal successor
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Copying | Skipped | Failed)
                | (Copying, Verifying | Failed)
                | (Verifying, Deleting | Done | Failed)
                | (Deleting, Done | Failed)
        )
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Copying => "copying",
            Self::Verifying => "verifying",
            Self::Deleting => "deleting",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an operator should treat a failed object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Copy or verify failed; the source is untouched and the next run retries it
    Recoverable,
    /// Copied and verified but the source could not be deleted
    NeedsCleanup,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Recoverable => "recoverable",
            Self::NeedsCleanup => "copied but source not deleted",
        })
    }
}

/// One object moving through copy, verify and delete
#[derive(Debug, Clone)]
pub struct TransferJob {
    descriptor: ObjectDescriptor,
    status: JobStatus,
    verified: bool,
}

impl TransferJob {
    /// New job in `Pending`
    pub fn new(descriptor: ObjectDescriptor) -> Self {
        Self {
            descriptor,
            status: JobStatus::Pending,
            verified: false,
        }
    }

    /// Object being transferred
    pub fn descriptor(&self) -> &ObjectDescriptor {
        &self.descriptor
    }

    /// Object key
    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    /// Current status
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Whether the destination passed verification
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Move to `next`
    pub fn advance(&mut self, next: JobStatus) -> Result<(), ArchiveError> {
        let allowed = self.status.can_advance_to(next)
            && (next != JobStatus::Deleting || self.verified);
        if !allowed {
            return Err(ArchiveError::InvalidTransition {
                key: self.descriptor.key.clone(),
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        tracing::trace!(key = %self.descriptor.key, from = %self.status, to = %next, "Job transition");
        self.status = next;
        Ok(())
    }

    /// Record a passed verification; only legal while `Verifying`
    pub fn mark_verified(&mut self) -> Result<(), ArchiveError> {
        if self.status != JobStatus::Verifying {
            return Err(ArchiveError::InvalidTransition {
                key: self.descriptor.key.clone(),
                from: self.status.as_str(),
                to: "verified",
            });
        }
        self.verified = true;
        Ok(())
    }

    /// Move to `Failed` from any non-terminal state
    fn fail(&mut self) {
        if !self.status.is_terminal() {
            self.status = JobStatus::Failed;
        }
    }
}

/// Outcome of one job
#[derive(Debug)]
pub struct TransferResult {
    /// Object key
    pub key: String,
    /// Terminal status
    pub status: JobStatus,
    /// Error, when failed
    pub error: Option<ArchiveError>,
    /// Operator classification, when failed
    pub failure_kind: Option<FailureKind>,
    /// Copy attempts made
    pub attempts: u32,
    /// Backend calls made across all phases
    pub backend_calls: u32,
    /// Object size
    pub bytes: u64,
    /// Destination passed verification
    pub verified: bool,
    /// Source was removed
    pub source_deleted: bool,
}

impl TransferResult {
    /// Result for a worker that panicked before reporting
    pub fn panicked(descriptor: &ObjectDescriptor, message: impl Into<String>) -> Self {
        Self {
            key: descriptor.key.clone(),
            status: JobStatus::Failed,
            error: Some(ArchiveError::WorkerPanic {
                key: descriptor.key.clone(),
                message: message.into(),
            }),
            // If the source survived, the next run lists it again.
            failure_kind: Some(FailureKind::Recoverable),
            attempts: 0,
            backend_calls: 0,
            bytes: descriptor.size,
            verified: false,
            source_deleted: false,
        }
    }

    /// Check whether the object reached `Done`
    pub fn is_done(&self) -> bool {
        self.status == JobStatus::Done
    }

    /// Human-readable reason for a failure
    pub fn error_reason(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

/// Compare destination metadata against the listed source
///
/// Size always; checksums only when both sides report one in the same
/// algorithm.
pub fn verify_copy(
    source: &ObjectDescriptor,
    destination: Option<&ObjectMeta>,
) -> Result<(), VerificationFailure> {
    let Some(destination) = destination else {
        return Err(VerificationFailure::Missing);
    };

    if destination.size != source.size {
        return Err(VerificationFailure::SizeMismatch {
            expected: source.size,
            actual: destination.size,
        });
    }

    if let (Some(expected), Some(actual)) = (&source.checksum, &destination.checksum) {
        if checksums_match(expected, actual) == Some(false) {
            return Err(VerificationFailure::ChecksumMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
    }

    Ok(())
}

struct Failure {
    error: ArchiveError,
    kind: FailureKind,
}

impl Failure {
    fn recoverable(error: ArchiveError) -> Self {
        Self {
            error,
            kind: FailureKind::Recoverable,
        }
    }
}

#[derive(Default)]
struct CallTally {
    copy_attempts: u32,
    calls: u32,
    deleted: bool,
}

impl CallTally {
    fn count<T>(&mut self, outcome: &Result<Retried<T>, RetryFailure>) -> u32 {
        let attempts = match outcome {
            Ok(retried) => retried.attempts,
            Err(failure) => failure.attempts,
        };
        self.calls += attempts;
        attempts
    }
}

/// Executes transfer jobs against one backend
#[derive(Clone)]
pub struct TransferWorker {
    store: Arc<dyn ObjectStore>,
    request: Arc<ArchiveRequest>,
    retry: RetryPolicy,
}

impl TransferWorker {
    /// Create a worker
    pub fn new(store: Arc<dyn ObjectStore>, request: Arc<ArchiveRequest>, retry: RetryPolicy) -> Self {
        Self {
            store,
            request,
            retry,
        }
    }

    /// Run a `Pending` job to a terminal state
    pub async fn run(&self, mut job: TransferJob) -> TransferResult {
        let mut tally = CallTally::default();
        let outcome = self.execute(&mut job, &mut tally).await;

        let (error, failure_kind) = match outcome {
            Ok(()) => {
                tracing::debug!(key = job.key(), deleted = tally.deleted, "Archived");
                (None, None)
            }
            Err(failure) => {
                job.fail();
                tracing::warn!(
                    key = job.key(),
                    kind = %failure.kind,
                    error = %failure.error,
                    "Transfer failed"
                );
                (Some(failure.error), Some(failure.kind))
            }
        };

        TransferResult {
            key: job.descriptor.key.clone(),
            status: job.status,
            error,
            failure_kind,
            attempts: tally.copy_attempts,
            backend_calls: tally.calls,
            bytes: job.descriptor.size,
            verified: job.verified,
            source_deleted: tally.deleted,
        }
    }

    async fn execute(&self, job: &mut TransferJob, tally: &mut CallTally) -> Result<(), Failure> {
        let request = &*self.request;
        let key = job.descriptor.key.clone();

        job.advance(JobStatus::Copying).map_err(Failure::recoverable)?;
        let copied = self
            .retry
            .run(StorageOp::Copy, &key, || {
                self.store
                    .copy(&request.source_bucket, &key, &request.destination_bucket, &key)
            })
            .await;
        tally.copy_attempts = tally.count(&copied);
        copied.map_err(|f| Failure::recoverable(f.into_error(&key)))?;

        job.advance(JobStatus::Verifying).map_err(Failure::recoverable)?;
        let head = self
            .retry
            .run(StorageOp::Head, &key, || {
                self.store.head(&request.destination_bucket, &key)
            })
            .await;
        tally.count(&head);
        let meta = head.map_err(|f| Failure::recoverable(f.into_error(&key)))?.value;

        verify_copy(&job.descriptor, meta.as_ref())
            .map_err(|reason| Failure::recoverable(ArchiveError::verification(&key, reason)))?;
        job.mark_verified().map_err(Failure::recoverable)?;

        if request.delete_source {
            job.advance(JobStatus::Deleting).map_err(Failure::recoverable)?;
            let deleted = self
                .retry
                .run(StorageOp::Delete, &key, || {
                    self.store.delete(&request.source_bucket, &key)
                })
                .await;
            tally.count(&deleted);
            deleted.map_err(|f| Failure {
                error: f.into_error(&key),
                kind: FailureKind::NeedsCleanup,
            })?;
            tally.deleted = true;
        }

        job.advance(JobStatus::Done).map_err(Failure::recoverable)?;
        Ok(())
    }
}
