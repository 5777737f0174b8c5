//! Archive run orchestration
//!
//! Lists the source, hands the candidates to the dispatcher and returns the
//! finished [`Summary`]. A run either fails before any transfer (invalid
//! request, listing failure) or completes with a summary, however many
//! individual objects failed.

use crate::config::{ArchiveRequest, EngineConfig, TriggerPayload};
use crate::core::{
    DeadlineMonitor, ExecutionBudget, ObjectLister, ResultAggregator, RetryPolicy, Summary,
    TransferWorker, WorkDispatcher,
};
use crate::error::{ArchiveError, Result};
use crate::progress::ProgressReporter;
use crate::storage::ObjectStore;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

/// Response of one triggered run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// HTTP-style status: 200 for any completed run
    pub status_code: u16,
    /// Summary, when the run completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
    /// Error message, when the run did not complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    /// Build the report for a run outcome
    pub fn from_result(result: Result<Summary>) -> Self {
        match result {
            Ok(summary) => Self {
                status_code: 200,
                summary: Some(summary),
                error: None,
            },
            Err(err) => Self {
                status_code: err.status_code(),
                summary: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// True for a completed run
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

/// Runs archive requests against one storage backend
pub struct ArchiveEngine {
    store: Arc<dyn ObjectStore>,
    config: EngineConfig,
    progress: Option<Arc<ProgressReporter>>,
}

impl ArchiveEngine {
    /// Create an engine
    pub fn new(store: Arc<dyn ObjectStore>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            progress: None,
        }
    }

    /// Report progress to a terminal
    pub fn with_progress(mut self, progress: Arc<ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse a trigger payload and run it
    pub async fn handle_payload(&self, json: &str) -> RunReport {
        let request = TriggerPayload::from_json(json).and_then(ArchiveRequest::from_payload);
        let result = match request {
            Ok(request) => self.run(request).await,
            Err(err) => {
                tracing::error!(error = %err, "Rejected trigger payload");
                Err(err)
            }
        };
        RunReport::from_result(result)
    }

    /// Run `request` with a budget starting now
    pub async fn run(&self, request: ArchiveRequest) -> Result<Summary> {
        let budget = ExecutionBudget::from_config(&self.config);
        self.run_with_budget(request, budget).await
    }

    /// Run `request` within an explicit budget
    pub async fn run_with_budget(
        &self,
        request: ArchiveRequest,
        budget: ExecutionBudget,
    ) -> Result<Summary> {
        self.config.validate()?;
        request.validate()?;
        let request = Arc::new(request);
        let retry = RetryPolicy::from_config(&self.config);

        tracing::info!(
            source = %request.source_bucket,
            destination = %request.destination_bucket,
            prefixes = ?request.prefixes,
            min_age = %humantime::format_duration(request.min_age),
            delete_source = request.delete_source,
            workers = self.config.workers,
            admission_window = %humantime::format_duration(budget.admission_window()),
            "Starting archive run"
        );

        if let Some(progress) = &self.progress {
            progress.set_status(&format!("Listing {}", request.source_bucket));
        }

        let lister = ObjectLister::new(self.store.clone(), request.clone(), retry.clone());
        let listing = match lister.list(Utc::now()).await {
            Ok(listing) => listing,
            Err(err) => {
                tracing::error!(error = %err, "Listing failed; no transfers started");
                if let Some(progress) = &self.progress {
                    progress.finish_error(&err.to_string());
                }
                return Err(err);
            }
        };

        let mut aggregator = ResultAggregator::new(self.config.progress_interval);
        if let Some(progress) = &self.progress {
            progress.set_totals(listing.len() as u64, listing.total_bytes());
            progress.set_status(&format!(
                "Archiving {} -> {}",
                request.source_bucket, request.destination_bucket
            ));
            aggregator = aggregator.with_progress(progress.clone());
        }
        aggregator.record_listed(listing.examined);
        aggregator.record_filtered(listing.rejected.total());

        let worker = TransferWorker::new(self.store.clone(), request.clone(), retry);
        let dispatcher =
            WorkDispatcher::new(worker, DeadlineMonitor::new(budget), self.config.workers);
        dispatcher.dispatch(listing, &aggregator).await;

        let summary = aggregator.finish();
        tracing::info!(
            listed = summary.listed,
            copied = summary.copied,
            deleted = summary.deleted,
            failed = summary.failed,
            needs_cleanup = summary.needs_cleanup,
            skipped_by_filter = summary.skipped_by_filter,
            skipped_by_deadline = summary.skipped_by_deadline,
            "Archive run complete"
        );

        if let Some(progress) = &self.progress {
            progress.finish_success(&format!(
                "{} archived, {} failed, {} skipped by deadline",
                summary.copied, summary.failed, summary.skipped_by_deadline
            ));
        }
        Ok(summary)
    }
}

impl From<&ArchiveError> for RunReport {
    fn from(err: &ArchiveError) -> Self {
        Self {
            status_code: err.status_code(),
            summary: None,
            error: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HashAlgorithm;
    use crate::error::{StorageError, StorageErrorKind};
    use crate::storage::{LocalStore, MemoryObject, MemoryStore, StorageOp};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config() -> EngineConfig {
        EngineConfig {
            workers: 4,
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(4),
            ..EngineConfig::default()
        }
    }

    fn seeded() -> Arc<MemoryStore> {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::new().with_checksums(HashAlgorithm::XXHash3));
        store.create_bucket("cold");
        for i in 0..5 {
            store.put(
                "hot",
                MemoryObject::new(format!("logs/{}.log", i), vec![b'x'; 100 + i])
                    .modified(now - ChronoDuration::days(120)),
            );
        }
        store.put(
            "hot",
            MemoryObject::new("logs/fresh.log", "new").modified(now - ChronoDuration::days(1)),
        );
        store.put(
            "hot",
            MemoryObject::new("tmp/old.bin", "old").modified(now - ChronoDuration::days(400)),
        );
        store
    }

    fn request() -> ArchiveRequest {
        ArchiveRequest::new("hot", "cold")
            .with_prefixes(["logs/"])
            .with_min_age_days(90)
            .with_delete(true)
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = seeded();
        let engine = ArchiveEngine::new(store.clone(), test_config());

        let first = engine.run(request()).await.unwrap();
        assert_eq!(first.copied, 5);
        assert_eq!(first.deleted, 5);
        assert_eq!(first.skipped_by_filter, 1);
        assert!(first.is_complete());

        let second = engine.run(request()).await.unwrap();
        assert_eq!(second.copied, 0);
        assert_eq!(second.failed, 0);
        assert_eq!(second.listed, 1);

        for i in 0..5 {
            assert_eq!(store.call_count(StorageOp::Copy, &format!("logs/{}.log", i)), 1);
        }
        assert!(store.contains("hot", "logs/fresh.log"));
        assert!(store.contains("hot", "tmp/old.bin"));
        assert_eq!(store.keys("cold").len(), 5);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_the_run() {
        let store = seeded();
        store.tamper_size("cold", "logs/1.log", 1);
        store.inject_fault(
            StorageOp::Delete,
            "logs/2.log",
            StorageError::new(StorageErrorKind::PermissionDenied, "403"),
        );

        let summary = ArchiveEngine::new(store.clone(), test_config())
            .run(request())
            .await
            .unwrap();

        assert_eq!(summary.copied, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.needs_cleanup, 1);
        assert_eq!(summary.recoverable(), 1);
        assert!(summary.is_complete());
        assert!(store.contains("hot", "logs/1.log"));
        assert!(store.contains("hot", "logs/2.log"));
    }

    #[tokio::test]
    async fn test_listing_failure_reports_500() {
        let store = seeded();
        store.inject_faults(
            StorageOp::List,
            "hot",
            3,
            StorageError::new(StorageErrorKind::ServerError, "503"),
        );
        let engine = ArchiveEngine::new(store.clone(), test_config());

        let report = engine
            .handle_payload(r#"{"source_bucket": "hot", "destination_bucket": "cold"}"#)
            .await;
        assert_eq!(report.status_code, 500);
        assert!(report.summary.is_none());
        assert_eq!(store.op_count(StorageOp::Copy), 0);
    }

    #[tokio::test]
    async fn test_invalid_payload_reports_400() {
        let engine = ArchiveEngine::new(seeded(), test_config());

        let report = engine.handle_payload(r#"{"source_bucket": "hot"}"#).await;
        assert_eq!(report.status_code, 400);

        let report = engine.handle_payload("not json").await;
        assert_eq!(report.status_code, 400);

        let report = engine
            .handle_payload(r#"{"source_bucket": "hot", "destination_bucket": "hot"}"#)
            .await;
        assert_eq!(report.status_code, 400);

        let store = seeded();
        let report = ArchiveEngine::new(store.clone(), test_config())
            .handle_payload(
                r#"{"source_bucket":"hot","destination_bucket":"cold","min_age_days_for_transfer":1000000000000000}"#,
            )
            .await;
        assert_eq!(report.status_code, 400);
        assert_eq!(store.op_count(StorageOp::List), 0);
        assert_eq!(store.op_count(StorageOp::Copy), 0);
    }

    #[tokio::test]
    async fn test_payload_run_reports_200() {
        let engine = ArchiveEngine::new(seeded(), test_config());
        let report = engine
            .handle_payload(
                r#"{
                    "source_bucket": "hot",
                    "destination_bucket": "cold",
                    "filename_prefixes": ["logs/", "tmp/"],
                    "min_age_days_for_transfer": 90
                }"#,
            )
            .await;

        assert!(report.is_success());
        let summary = report.summary.unwrap();
        assert_eq!(summary.copied, 6);
        assert_eq!(summary.deleted, 0);

        let json = serde_json::to_value(RunReport::from(&ArchiveError::payload("x"))).unwrap();
        assert_eq!(json["status_code"], 400);
        assert!(json.get("summary").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_truncated_run_still_completes() {
        let store = Arc::new(MemoryStore::new().with_copy_latency(Duration::from_secs(5)));
        store.create_bucket("cold");
        for i in 0..6 {
            store.put("hot", MemoryObject::new(format!("k{}", i), "v"));
        }
        let config = EngineConfig {
            workers: 2,
            ..test_config()
        };
        let budget = ExecutionBudget::starting_now(Duration::from_secs(10), Duration::from_secs(2));

        let summary = ArchiveEngine::new(store.clone(), config)
            .run_with_budget(ArchiveRequest::new("hot", "cold").with_delete(true), budget)
            .await
            .unwrap();

        // Waves start at t=0 and t=5; t=10 is past the admission window
        assert_eq!(summary.copied, 4);
        assert_eq!(summary.skipped_by_deadline, 2);
        assert!(summary.deadline_reached());
        assert!(summary.is_complete());
        assert_eq!(RunReport::from_result(Ok(summary)).status_code, 200);
    }

    #[tokio::test]
    async fn test_local_backend_end_to_end() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("hot/logs")).unwrap();
        std::fs::create_dir_all(dir.path().join("cold")).unwrap();
        std::fs::write(dir.path().join("hot/logs/a.log"), b"alpha").unwrap();
        std::fs::write(dir.path().join("hot/keep.txt"), b"keep").unwrap();

        let store = Arc::new(LocalStore::new(dir.path()).with_checksums(HashAlgorithm::Blake3));
        let summary = ArchiveEngine::new(store, test_config())
            .run(ArchiveRequest::new("hot", "cold").with_prefixes(["logs/"]).with_delete(true))
            .await
            .unwrap();

        assert_eq!(summary.copied, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.skipped_by_filter, 0);
        assert!(!dir.path().join("hot/logs/a.log").exists());
        assert_eq!(std::fs::read(dir.path().join("cold/logs/a.log")).unwrap(), b"alpha");
        assert!(dir.path().join("hot/keep.txt").exists());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = EngineConfig {
            safety_margin: Duration::from_secs(7200),
            ..test_config()
        };
        let err = ArchiveEngine::new(seeded(), config)
            .run(request())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::ConfigError(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_with_explicit_budget() {
        let store = seeded();
        let config = EngineConfig {
            workers: 0,
            ..test_config()
        };
        let budget = ExecutionBudget::starting_now(Duration::from_secs(60), Duration::from_secs(5));
        let err = ArchiveEngine::new(store.clone(), config)
            .run_with_budget(request(), budget)
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::ConfigError(_)));
        assert_eq!(store.op_count(StorageOp::List), 0);
    }
}
