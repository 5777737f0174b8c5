//! # objarchive - Deadline-aware object archiving
//!
//! objarchive moves aged objects from a source bucket to a destination
//! bucket inside a fixed execution budget, such as a serverless function
//! timeout.
//!
//! ## Features
//!
//! - **Filtered Listing**: Key prefixes, minimum age and storage class
//! - **Copy, Verify, Delete**: A source is only removed after its copy is
//!   confirmed to exist with the same size (and checksum when available)
//! - **Bounded Retries**: Exponential backoff with jitter for throttling,
//!   5xx and network errors; permanent errors fail fast
//! - **Deadline Gating**: No new transfers once the budget minus a safety
//!   margin has elapsed; in-flight transfers always finish
//! - **Operator Summary**: Counts per outcome and failures split into
//!   recoverable and needs-cleanup
//! - **Backends**: In-memory, local directory tree, and S3 (`native_s3`)
//!
//! ## Quick Start
//!
//! ```no_run
//! use objarchive::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> objarchive::Result<()> {
//! let store = Arc::new(LocalStore::new("/srv/buckets").with_checksums(HashAlgorithm::Blake3));
//! let engine = ArchiveEngine::new(store, EngineConfig::default());
//!
//! let request = ArchiveRequest::new("hot", "cold")
//!     .with_prefixes(["logs/"])
//!     .with_min_age_days(90)
//!     .with_delete(true);
//!
//! let summary = engine.run(request).await?;
//! summary.print_summary();
//! # Ok(())
//! # }
//! ```
//!
//! ## Trigger Payloads
//!
//! ```no_run
//! use objarchive::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let engine = ArchiveEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default());
//! let report = engine
//!     .handle_payload(r#"{"source_bucket": "hot", "destination_bucket": "cold"}"#)
//!     .await;
//! println!("{}", report.status_code);
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod hash;
pub mod progress;
pub mod storage;

// Re-export commonly used types
pub use config::{ArchiveRequest, EngineConfig, HashAlgorithm, TriggerPayload};
pub use core::{ArchiveEngine, RunReport, Summary};
pub use error::{ArchiveError, Result};
pub use progress::ProgressReporter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use objarchive::prelude::*;
    //! ```

    pub use crate::config::{ArchiveRequest, EngineConfig, HashAlgorithm, TriggerPayload};
    pub use crate::core::{
        ArchiveEngine, DeadlineMonitor, ExecutionBudget, JobStatus, RetryPolicy, RunReport,
        Summary, TransferJob, TransferResult,
    };
    pub use crate::error::{ArchiveError, Result, StorageError, StorageErrorKind};
    pub use crate::progress::ProgressReporter;
    pub use crate::storage::{LocalStore, MemoryObject, MemoryStore, ObjectDescriptor, ObjectStore};
    #[cfg(feature = "native_s3")]
    pub use crate::storage::{NativeS3Config, S3Store};
}
