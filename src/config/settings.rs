//! Configuration settings for objarchive
//!
//! Defines the CLI arguments, the trigger payload, the normalized
//! [`ArchiveRequest`] and the process-wide [`EngineConfig`].

use crate::error::{ArchiveError, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of concurrent transfer workers
pub const DEFAULT_WORKERS: usize = 90;

/// Default total execution budget (serverless request timeout)
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(3600);

/// Default time reserved for in-flight transfers to finish
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(30);

/// Default attempts per backend operation, including the first
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default first backoff delay
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1500);

/// Default backoff ceiling
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(64);

/// Default number of finished jobs between progress log lines
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;

/// Longest accepted backoff ceiling
pub const MAX_BACKOFF_CAP: Duration = Duration::from_secs(3600);

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

fn min_age_from_days(days: u64) -> Option<Duration> {
    days.checked_mul(SECONDS_PER_DAY).map(Duration::from_secs)
}

/// objarchive - Move aged objects between buckets with copy, verify, delete
#[derive(Parser, Debug, Clone)]
#[command(name = "objarchive")]
#[command(author = "objarchive Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deadline-aware copy/verify/delete archiver for object storage")]
#[command(long_about = r#"
objarchive relocates objects from a source bucket to a destination bucket.

Every object is copied, the copy is verified (existence, size, checksum when
available), and only then is the source deleted if requested. The run stops
admitting new objects once the time budget minus the safety margin elapses;
objects already in flight always finish.

Examples:
  objarchive --source-bucket hot --destination-bucket cold --prefix logs/ --min-age-days 90
  objarchive --payload trigger.json --delete
  objarchive --backend s3 --payload - < trigger.json
"#)]
pub struct CliArgs {
    /// JSON trigger payload file ('-' reads stdin)
    #[arg(long, value_name = "PATH", conflicts_with_all = ["source_bucket", "destination_bucket"])]
    pub payload: Option<PathBuf>,

    /// Bucket to archive from
    #[arg(long, value_name = "BUCKET")]
    pub source_bucket: Option<String>,

    /// Bucket to archive into
    #[arg(long, value_name = "BUCKET")]
    pub destination_bucket: Option<String>,

    /// Key prefix to include (repeatable; none = all keys)
    #[arg(short = 'p', long = "prefix", value_name = "PREFIX")]
    pub prefixes: Vec<String>,

    /// Minimum object age in days
    #[arg(long, default_value = "0", value_name = "DAYS")]
    pub min_age_days: u64,

    /// Delete each source object after its copy is verified
    #[arg(long)]
    pub delete: bool,

    /// Only archive objects currently in this storage class
    #[arg(long, value_name = "CLASS")]
    pub source_storage_class: Option<String>,

    /// Storage backend
    #[arg(long, value_enum, default_value = "local")]
    pub backend: BackendKind,

    /// Root directory holding one sub-directory per bucket (local backend)
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub root: PathBuf,

    /// Compute checksums for verification (local backend)
    #[arg(long, value_enum, value_name = "ALGO")]
    pub checksum: Option<HashAlgorithm>,

    /// Region (s3 backend)
    #[arg(long, value_name = "REGION")]
    pub region: Option<String>,

    /// Custom endpoint URL for S3-compatible services (s3 backend)
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Compare single-part ETags when verifying copies (s3 backend)
    #[arg(long)]
    pub compare_etags: bool,

    /// Number of concurrent transfer workers
    #[arg(short = 'w', long, value_name = "NUM")]
    pub workers: Option<usize>,

    /// Total execution budget (e.g. 1h, 55m)
    #[arg(long, value_parser = parse_duration, value_name = "DURATION")]
    pub time_budget: Option<Duration>,

    /// Time reserved for in-flight transfers (e.g. 30s)
    #[arg(long, value_parser = parse_duration, value_name = "DURATION")]
    pub safety_margin: Option<Duration>,

    /// Attempts per backend operation, including the first
    #[arg(long, value_name = "NUM")]
    pub max_attempts: Option<u32>,

    /// First retry delay (e.g. 1500ms)
    #[arg(long, value_parser = parse_duration, value_name = "DURATION")]
    pub backoff_base: Option<Duration>,

    /// Retry delay ceiling (e.g. 64s)
    #[arg(long, value_parser = parse_duration, value_name = "DURATION")]
    pub backoff_cap: Option<Duration>,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (warnings and errors only)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Output format for the summary
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,
}

/// Storage backend selection
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Directory tree on the local filesystem
    #[default]
    Local,
    /// S3-compatible object storage (requires the `native_s3` feature)
    S3,
}

/// Hash algorithm for checksum verification
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// XXHash3 - Ultra fast, non-cryptographic (128-bit)
    #[default]
    #[value(name = "xxhash3")]
    XXHash3,
    /// XXHash64 - Fast, non-cryptographic (64-bit)
    #[value(name = "xxhash64")]
    XXHash64,
    /// BLAKE3 - Fast and cryptographically secure
    #[value(name = "blake3")]
    Blake3,
    /// SHA-256 - Standard cryptographic hash
    #[value(name = "sha256")]
    Sha256,
}

impl HashAlgorithm {
    /// Prefix used in tagged checksum strings
    pub fn tag(&self) -> &'static str {
        match self {
            Self::XXHash3 => "xxh3",
            Self::XXHash64 => "xxh64",
            Self::Blake3 => "blake3",
            Self::Sha256 => "sha256",
        }
    }
}

/// Output format for the run summary
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
}

fn default_prefixes() -> Vec<String> {
    vec![String::new()]
}

/// Trigger payload as delivered by the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerPayload {
    /// Bucket to archive from
    pub source_bucket: Option<String>,
    /// Bucket to archive into
    pub destination_bucket: Option<String>,
    /// Key prefixes (OR); `[""]` matches everything
    #[serde(default = "default_prefixes")]
    pub filename_prefixes: Vec<String>,
    /// Minimum object age in days
    #[serde(default)]
    pub min_age_days_for_transfer: i64,
    /// Delete sources after verified copy
    #[serde(default)]
    pub delete_source_after_transfer: bool,
    /// Only archive objects in this storage class
    #[serde(default)]
    pub source_storage_class: Option<String>,
}

impl TriggerPayload {
    /// Parse a payload from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Normalized archive request; immutable for the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRequest {
    /// Bucket to archive from
    pub source_bucket: String,
    /// Bucket to archive into
    pub destination_bucket: String,
    /// Key prefixes (OR); empty matches everything
    pub prefixes: Vec<String>,
    /// Minimum age an object must reach before it is archived
    pub min_age: Duration,
    /// Delete each source after its copy is verified
    pub delete_source: bool,
    /// Only archive objects in this storage class
    pub storage_class_filter: Option<String>,
}

impl ArchiveRequest {
    /// Create a copy-only request with no filters
    pub fn new(source_bucket: impl Into<String>, destination_bucket: impl Into<String>) -> Self {
        Self {
            source_bucket: source_bucket.into(),
            destination_bucket: destination_bucket.into(),
            prefixes: Vec::new(),
            min_age: Duration::ZERO,
            delete_source: false,
            storage_class_filter: None,
        }
    }

    /// Set the prefix filters
    pub fn with_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Set the minimum age in days; saturates so an oversized value archives nothing
    pub fn with_min_age_days(mut self, days: u64) -> Self {
        self.min_age = min_age_from_days(days).unwrap_or(Duration::MAX);
        self
    }

    /// Enable source deletion after verified copy
    pub fn with_delete(mut self, delete: bool) -> Self {
        self.delete_source = delete;
        self
    }

    /// Restrict to a source storage class
    pub fn with_storage_class(mut self, class: impl Into<String>) -> Self {
        self.storage_class_filter = Some(class.into());
        self
    }

    /// Normalize and validate a trigger payload
    pub fn from_payload(payload: TriggerPayload) -> Result<Self> {
        let source = payload.source_bucket.unwrap_or_default();
        let destination = payload.destination_bucket.unwrap_or_default();

        if payload.min_age_days_for_transfer < 0 {
            return Err(ArchiveError::payload(format!(
                "'min_age_days_for_transfer' must not be negative, got {}",
                payload.min_age_days_for_transfer
            )));
        }

        let min_age = min_age_from_days(payload.min_age_days_for_transfer as u64).ok_or_else(|| {
            ArchiveError::payload(format!(
                "'min_age_days_for_transfer' is out of range, got {}",
                payload.min_age_days_for_transfer
            ))
        })?;

        let mut request = Self::new(source, destination)
            .with_prefixes(payload.filename_prefixes)
            .with_delete(payload.delete_source_after_transfer);
        request.min_age = min_age;

        let request = match payload.source_storage_class {
            Some(class) if !class.is_empty() => request.with_storage_class(class),
            _ => request,
        };

        request.validate()?;
        Ok(request)
    }

    /// Build a request from CLI flags (payload file handled by the caller)
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let source = args
            .source_bucket
            .clone()
            .ok_or_else(|| ArchiveError::payload("--source-bucket is required"))?;
        let destination = args
            .destination_bucket
            .clone()
            .ok_or_else(|| ArchiveError::payload("--destination-bucket is required"))?;

        let min_age = min_age_from_days(args.min_age_days).ok_or_else(|| {
            ArchiveError::payload(format!("--min-age-days is out of range, got {}", args.min_age_days))
        })?;

        let mut request = Self::new(source, destination)
            .with_prefixes(args.prefixes.iter().cloned())
            .with_delete(args.delete);
        request.min_age = min_age;
        request.storage_class_filter = args.source_storage_class.clone();

        request.validate()?;
        Ok(request)
    }

    /// Check the request is safe to run
    pub fn validate(&self) -> Result<()> {
        if self.source_bucket.trim().is_empty() || self.destination_bucket.trim().is_empty() {
            return Err(ArchiveError::payload("Missing source or destination bucket name"));
        }
        if self.source_bucket == self.destination_bucket {
            return Err(ArchiveError::payload("Source and destination buckets must differ"));
        }
        Ok(())
    }

    /// True when no prefix restricts the listing
    pub fn matches_all_keys(&self) -> bool {
        self.prefixes.is_empty() || self.prefixes.iter().any(|p| p.is_empty())
    }
}

/// Process-wide engine tuning; not part of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Concurrent transfer workers
    pub workers: usize,
    /// Total execution budget for one run
    pub time_budget: Duration,
    /// Time reserved so in-flight transfers finish before forced termination
    pub safety_margin: Duration,
    /// Attempts per backend operation, including the first
    pub max_attempts: u32,
    /// First retry delay
    pub backoff_base: Duration,
    /// Retry delay ceiling (before jitter)
    pub backoff_cap: Duration,
    /// Finished jobs between progress log lines
    pub progress_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            time_budget: DEFAULT_TIME_BUDGET,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `OBJARCHIVE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_var("OBJARCHIVE_WORKERS") {
            config.workers = v
                .parse()
                .map_err(|_| ArchiveError::config(format!("Invalid OBJARCHIVE_WORKERS: {}", v)))?;
        }
        if let Some(v) = env_var("OBJARCHIVE_TIME_BUDGET") {
            config.time_budget = env_duration("OBJARCHIVE_TIME_BUDGET", &v)?;
        }
        if let Some(v) = env_var("OBJARCHIVE_SAFETY_MARGIN") {
            config.safety_margin = env_duration("OBJARCHIVE_SAFETY_MARGIN", &v)?;
        }
        if let Some(v) = env_var("OBJARCHIVE_MAX_ATTEMPTS") {
            config.max_attempts = v.parse().map_err(|_| {
                ArchiveError::config(format!("Invalid OBJARCHIVE_MAX_ATTEMPTS: {}", v))
            })?;
        }
        if let Some(v) = env_var("OBJARCHIVE_BACKOFF_BASE") {
            config.backoff_base = env_duration("OBJARCHIVE_BACKOFF_BASE", &v)?;
        }
        if let Some(v) = env_var("OBJARCHIVE_BACKOFF_CAP") {
            config.backoff_cap = env_duration("OBJARCHIVE_BACKOFF_CAP", &v)?;
        }

        Ok(config)
    }

    /// Apply CLI overrides on top of this configuration
    pub fn apply_cli(mut self, args: &CliArgs) -> Self {
        if let Some(workers) = args.workers {
            self.workers = workers;
        }
        if let Some(budget) = args.time_budget {
            self.time_budget = budget;
        }
        if let Some(margin) = args.safety_margin {
            self.safety_margin = margin;
        }
        if let Some(attempts) = args.max_attempts {
            self.max_attempts = attempts;
        }
        if let Some(base) = args.backoff_base {
            self.backoff_base = base;
        }
        if let Some(cap) = args.backoff_cap {
            self.backoff_cap = cap;
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ArchiveError::config("Worker pool size must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(ArchiveError::config("Max attempts must be at least 1"));
        }
        if self.safety_margin >= self.time_budget {
            return Err(ArchiveError::config(format!(
                "Safety margin ({}) must be shorter than the time budget ({})",
                humantime::format_duration(self.safety_margin),
                humantime::format_duration(self.time_budget)
            )));
        }
        if self.backoff_cap < self.backoff_base {
            return Err(ArchiveError::config("Backoff cap must not be below the backoff base"));
        }
        if self.backoff_cap > MAX_BACKOFF_CAP {
            return Err(ArchiveError::config(format!(
                "Backoff cap must not exceed {}",
                humantime::format_duration(MAX_BACKOFF_CAP)
            )));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_duration(name: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| ArchiveError::config(format!("Invalid {}: {}", name, e)))
}

/// Parse a human-readable duration ("90s", "1h 30m", "1500ms")
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(value.trim()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_defaults() {
        let payload =
            TriggerPayload::from_json(r#"{"source_bucket":"hot","destination_bucket":"cold"}"#)
                .unwrap();
        assert_eq!(payload.filename_prefixes, vec![String::new()]);
        assert_eq!(payload.min_age_days_for_transfer, 0);
        assert!(!payload.delete_source_after_transfer);

        let request = ArchiveRequest::from_payload(payload).unwrap();
        assert!(request.matches_all_keys());
        assert_eq!(request.min_age, Duration::ZERO);
        assert!(!request.delete_source);
    }

    #[test]
    fn test_payload_full() {
        let payload = TriggerPayload::from_json(
            r#"{
                "source_bucket": "hot",
                "destination_bucket": "cold",
                "filename_prefixes": ["2023/", "logs/"],
                "min_age_days_for_transfer": 90,
                "delete_source_after_transfer": true,
                "source_storage_class": "COLDLINE"
            }"#,
        )
        .unwrap();

        let request = ArchiveRequest::from_payload(payload).unwrap();
        assert_eq!(request.prefixes, vec!["2023/", "logs/"]);
        assert_eq!(request.min_age, Duration::from_secs(90 * 86_400));
        assert!(request.delete_source);
        assert_eq!(request.storage_class_filter.as_deref(), Some("COLDLINE"));
        assert!(!request.matches_all_keys());
    }

    #[test]
    fn test_payload_validation() {
        let missing = TriggerPayload::from_json(r#"{"source_bucket":"hot"}"#).unwrap();
        assert!(matches!(
            ArchiveRequest::from_payload(missing),
            Err(ArchiveError::InvalidPayload(_))
        ));

        let same = TriggerPayload::from_json(
            r#"{"source_bucket":"hot","destination_bucket":"hot"}"#,
        )
        .unwrap();
        assert!(ArchiveRequest::from_payload(same).is_err());

        let negative = TriggerPayload::from_json(
            r#"{"source_bucket":"a","destination_bucket":"b","min_age_days_for_transfer":-1}"#,
        )
        .unwrap();
        assert!(ArchiveRequest::from_payload(negative).is_err());

        let wrong_type = TriggerPayload::from_json(
            r#"{"source_bucket":"a","destination_bucket":"b","filename_prefixes":"logs/"}"#,
        );
        assert!(matches!(wrong_type, Err(ArchiveError::InvalidPayload(_))));
    }

    #[test]
    fn test_oversized_min_age_rejected() {
        let payload = TriggerPayload::from_json(
            r#"{"source_bucket":"hot","destination_bucket":"cold","min_age_days_for_transfer":1000000000000000}"#,
        )
        .unwrap();
        let err = ArchiveRequest::from_payload(payload).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidPayload(_)));
        assert_eq!(err.status_code(), 400);

        let args = CliArgs::parse_from([
            "objarchive",
            "--source-bucket",
            "hot",
            "--destination-bucket",
            "cold",
            "--min-age-days",
            "213503982334602",
        ]);
        assert!(matches!(
            ArchiveRequest::from_cli(&args),
            Err(ArchiveError::InvalidPayload(_))
        ));

        let request = ArchiveRequest::new("hot", "cold").with_min_age_days(u64::MAX);
        assert_eq!(request.min_age, Duration::MAX);
    }

    #[test]
    fn test_engine_config_validation() {
        assert!(EngineConfig::default().validate().is_ok());

        let config = EngineConfig {
            safety_margin: Duration::from_secs(10),
            time_budget: Duration::from_secs(10),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            backoff_cap: Duration::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let args = CliArgs::parse_from([
            "objarchive",
            "--source-bucket",
            "hot",
            "--destination-bucket",
            "cold",
            "--prefix",
            "logs/",
            "--min-age-days",
            "30",
            "--delete",
            "--workers",
            "8",
            "--time-budget",
            "10m",
            "--safety-margin",
            "45s",
        ]);

        let request = ArchiveRequest::from_cli(&args).unwrap();
        assert_eq!(request.prefixes, vec!["logs/"]);
        assert!(request.delete_source);
        assert_eq!(request.min_age, Duration::from_secs(30 * 86_400));

        let config = EngineConfig::default().apply_cli(&args);
        assert_eq!(config.workers, 8);
        assert_eq!(config.time_budget, Duration::from_secs(600));
        assert_eq!(config.safety_margin, Duration::from_secs(45));
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(!args.compare_etags);

        let args = CliArgs::parse_from(["objarchive", "--backend", "s3", "--compare-etags"]);
        assert_eq!(args.backend, BackendKind::S3);
        assert!(args.compare_etags);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1500ms").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("soon").is_err());
    }
}
