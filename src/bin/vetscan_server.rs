//! HTTP server binary for vetscan.
//!
//! Wires the filesystem object store, a document processor client and the
//! report store into a [`ReportProcessor`] and serves [`vetscan::server::router`].
//!
//! # Environment Variables
//! - `VETSCAN_ADDR`: bind address (default `0.0.0.0:8080`)
//! - `VETSCAN_STORAGE_DIR`: object store root (default `vetscan-storage`)
//! - `VETSCAN_PUBLIC_URL`: URL prefix for stored objects (default: `file://` URL of the storage dir)
//! - `VETSCAN_EXTRACTOR_URL`, `VETSCAN_EXTRACTOR_TOKEN`, `VETSCAN_EXTRACTOR_TIMEOUT`:
//!   document processor client
//! - `VETSCAN_DOCUMENT_JSON`: saved processor response, used instead of a live processor
//! - `VETSCAN_REPORTS_FILE`: JSON snapshot of stored reports
//! - `VETSCAN_MAX_FILE_SIZE_MB`, `VETSCAN_UPLOAD_CONCURRENCY`: processing limits
//! - `VETSCAN_DEBUG_ERRORS`: expose failure detail in 500 responses

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vetscan::server::{router, AppState};
use vetscan::services::{
    DocumentAiExtractor, EntityExtractor, FsObjectStore, MemoryReportStore, StaticExtractor,
};
use vetscan::{ProcessingConfig, ReportProcessor, MIB};

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is normal in production.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vetscan=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let addr = std::env::var("VETSCAN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());

    let config = ProcessingConfig::builder()
        .max_file_size(env_parse("VETSCAN_MAX_FILE_SIZE_MB", 10u64)?.saturating_mul(MIB))
        .upload_concurrency(env_parse("VETSCAN_UPLOAD_CONCURRENCY", 4usize)?)
        .debug_errors(env_parse("VETSCAN_DEBUG_ERRORS", false)?)
        .build()
        .context("Invalid configuration")?;

    let storage_dir = PathBuf::from(
        std::env::var("VETSCAN_STORAGE_DIR").unwrap_or_else(|_| "vetscan-storage".into()),
    );
    tokio::fs::create_dir_all(&storage_dir)
        .await
        .with_context(|| format!("Failed to create {}", storage_dir.display()))?;
    let public_url = match std::env::var("VETSCAN_PUBLIC_URL") {
        Ok(url) => url,
        Err(_) => {
            let abs = std::fs::canonicalize(&storage_dir)
                .with_context(|| format!("Failed to resolve {}", storage_dir.display()))?;
            format!("file://{}", abs.display())
        }
    };
    let objects = Arc::new(FsObjectStore::new(&storage_dir, public_url));

    let reports = match std::env::var("VETSCAN_REPORTS_FILE").ok() {
        Some(path) => MemoryReportStore::with_snapshot(&path)
            .await
            .with_context(|| format!("Failed to open {path}"))?,
        None => MemoryReportStore::new(),
    };

    let extractor = build_extractor().await?;
    let processor = ReportProcessor::new(config, objects, extractor, Arc::new(reports));
    tracing::info!("{:?}", processor);

    let app = router(AppState::new(Arc::new(processor)));

    tracing::info!("-- Starting vetscan API on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_extractor() -> Result<Arc<dyn EntityExtractor>> {
    if let Ok(path) = std::env::var("VETSCAN_DOCUMENT_JSON") {
        let json = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {path}"))?;
        let extractor = StaticExtractor::from_document_ai_json(&json)
            .with_context(|| format!("Failed to parse {path}"))?;
        tracing::warn!("Serving a fixed processor response from {}", path);
        return Ok(Arc::new(extractor));
    }
    if let Ok(url) = std::env::var("VETSCAN_EXTRACTOR_URL") {
        let token = std::env::var("VETSCAN_EXTRACTOR_TOKEN").ok();
        let timeout = env_parse("VETSCAN_EXTRACTOR_TIMEOUT", 120u64)?;
        let extractor = DocumentAiExtractor::new(url, token, timeout)
            .context("Failed to build processor client")?;
        return Ok(Arc::new(extractor));
    }
    bail!("No entity extractor configured: set VETSCAN_EXTRACTOR_URL or VETSCAN_DOCUMENT_JSON")
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => Ok(value),
            Err(e) => bail!("{name}={raw:?} is invalid: {e}"),
        },
        Err(_) => Ok(default),
    }
}
