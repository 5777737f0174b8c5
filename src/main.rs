//! objarchive CLI - Deadline-aware object archiver
//!
//! Runs one archive request from flags or a JSON trigger payload and prints
//! the run summary.

use clap::Parser;
use objarchive::config::{ArchiveRequest, BackendKind, CliArgs, EngineConfig, OutputFormat, TriggerPayload};
use objarchive::core::{ArchiveEngine, RunReport};
use objarchive::error::{ArchiveError, IoResultExt, Result};
use objarchive::progress::ProgressReporter;
use objarchive::storage::{LocalStore, ObjectStore};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging(&args);

    let result = run(&args).await;
    let code = match &result {
        Ok(_) => 0,
        Err(e) => e.exit_code(),
    };

    match args.output_format {
        OutputFormat::Json => {
            let report = RunReport::from_result(result);
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Error: failed to serialize report: {}", e),
            }
        }
        OutputFormat::Text => match result {
            Ok(summary) => {
                if !args.quiet {
                    summary.print_summary();
                }
            }
            Err(e) => eprintln!("Error: {}", e),
        },
    }

    std::process::exit(code);
}

fn init_logging(args: &CliArgs) {
    let level = if args.quiet {
        "warn"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("objarchive={}", level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: &CliArgs) -> Result<objarchive::Summary> {
    let request = match &args.payload {
        Some(path) => {
            let payload = TriggerPayload::from_json(&read_payload(path)?)?;
            let mut request = ArchiveRequest::from_payload(payload)?;
            if args.delete {
                request.delete_source = true;
            }
            request
        }
        None => ArchiveRequest::from_cli(args)?,
    };

    let config = EngineConfig::from_env()?.apply_cli(args);
    config.validate()?;

    if args.verbose > 0 {
        print_config(&request, &config);
    }

    let store = build_store(args).await?;
    let mut engine = ArchiveEngine::new(store, config);
    if args.progress && !args.quiet {
        engine = engine.with_progress(Arc::new(ProgressReporter::new()));
    }

    engine.run(request).await
}

fn read_payload(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut json = String::new();
        std::io::stdin().read_to_string(&mut json).with_path("<stdin>")?;
        Ok(json)
    } else {
        std::fs::read_to_string(path).with_path(path)
    }
}

async fn build_store(args: &CliArgs) -> Result<Arc<dyn ObjectStore>> {
    match args.backend {
        BackendKind::Local => {
            if !args.root.is_dir() {
                return Err(ArchiveError::config(format!(
                    "Local root '{}' is not a directory",
                    args.root.display()
                )));
            }
            let mut store = LocalStore::new(&args.root);
            if let Some(algorithm) = args.checksum {
                store = store.with_checksums(algorithm);
            }
            Ok(Arc::new(store))
        }
        BackendKind::S3 => build_s3_store(args).await,
    }
}

#[cfg(feature = "native_s3")]
async fn build_s3_store(args: &CliArgs) -> Result<Arc<dyn ObjectStore>> {
    use objarchive::storage::{NativeS3Config, S3Store};

    let mut config = NativeS3Config::from_env();
    if let Some(region) = &args.region {
        config.region = region.clone();
    }
    if let Some(endpoint) = &args.endpoint {
        config.endpoint_url = Some(endpoint.clone());
        config.force_path_style = true;
    }
    if args.compare_etags {
        config.compare_etags = true;
    }
    Ok(Arc::new(S3Store::new(config).await))
}

#[cfg(not(feature = "native_s3"))]
async fn build_s3_store(_args: &CliArgs) -> Result<Arc<dyn ObjectStore>> {
    Err(ArchiveError::config(
        "S3 backend not available; rebuild with --features native_s3",
    ))
}

fn print_config(request: &ArchiveRequest, config: &EngineConfig) {
    eprintln!("=== objarchive Configuration ===");
    eprintln!("Source:        {}", request.source_bucket);
    eprintln!("Destination:   {}", request.destination_bucket);
    if request.matches_all_keys() {
        eprintln!("Prefixes:      (all keys)");
    } else {
        eprintln!("Prefixes:      {}", request.prefixes.join(", "));
    }
    eprintln!("Min age:       {}", humantime::format_duration(request.min_age));
    if let Some(class) = &request.storage_class_filter {
        eprintln!("Storage class: {}", class);
    }
    eprintln!("Delete source: {}", request.delete_source);
    eprintln!("Workers:       {}", config.workers);
    eprintln!("Time budget:   {}", humantime::format_duration(config.time_budget));
    eprintln!("Safety margin: {}", humantime::format_duration(config.safety_margin));
    eprintln!("Max attempts:  {}", config.max_attempts);
    eprintln!();
}
