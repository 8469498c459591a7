//! # vetscan
//!
//! Recover embedded images and structured clinical fields from veterinary
//! ultrasound report PDFs.
//!
//! ## Why this crate?
//!
//! Ultrasound reports arrive as PDFs that mix free text with the scanner's
//! captured frames. Page rasterisation would flatten those frames into the
//! surrounding layout, so instead this crate walks the PDF object table and
//! pulls each image stream out as-is. Text fields come from an external
//! entity-extraction engine whose labels are noisy; an alias table routes
//! them onto a fixed report schema, and a regex pass over the raw text
//! backfills diagnosis and recommendations when the engine misses them.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Validate  MIME type, size, %PDF- signature
//!  ├─ 2. Store     original PDF → object store
//!  ├─ 3. Scan      embedded images via lopdf (spawn_blocking)
//!  ├─ 4. Upload    images, bounded concurrency, failures dropped
//!  ├─ 5. Extract   entity-extraction engine (one call)
//!  ├─ 6. Map       alias table + confidence rule + text fallback
//!  └─ 7. Persist   report store assigns the id
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vetscan::services::{MemoryObjectStore, MemoryReportStore, StaticExtractor};
//! use vetscan::{ProcessingConfig, ReportProcessor, UploadedFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let json = std::fs::read_to_string("processor-response.json")?;
//!     let processor = ReportProcessor::new(
//!         ProcessingConfig::default(),
//!         Arc::new(MemoryObjectStore::new()),
//!         Arc::new(StaticExtractor::from_document_ai_json(&json)?),
//!         Arc::new(MemoryReportStore::new()),
//!     );
//!     let bytes = std::fs::read("informe.pdf")?;
//!     let outcome = processor.process_upload(UploadedFile::pdf("informe.pdf", bytes)).await?;
//!     println!("{} → {} image(s)", outcome.report.id, outcome.report.report.images.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `vetscan` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `server` | off     | Enables [`server`] and the `vetscan-server` binary (axum + tower-http + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! vetscan = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod report;
pub mod schema;
#[cfg(feature = "server")]
pub mod server;
pub mod services;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ProcessingConfig, ProcessingConfigBuilder, ScanLimits, DEFAULT_MAX_FILE_SIZE, MIB,
};
pub use error::{ExtractionWarning, PipelineStage, ReportError, ServiceError, ValidationError};
pub use pipeline::mapper::{EntityMapper, MappedFields};
pub use pipeline::scan::{scan, scan_images, scan_with_limits, ScanOutcome};
pub use pipeline::sections::{extract_sections, TextSections};
pub use pipeline::sniff::{format_bytes, sniff_format};
pub use process::{
    assemble_report, inspect_images, ProcessingOutcome, ReportProcessor, UploadedFile,
};
pub use progress::{NoopProgressCallback, ProcessingProgressCallback, ProgressCallback};
pub use report::{
    CanonicalReport, EntityRecord, ExtractedDocument, ImageFormat, ImageReference, RawImageRecord,
    ReportStatus, StoredReport, NOT_DETECTED,
};
pub use schema::AliasTable;
