//! Progress-callback trait for per-stage processing events.
//!
//! Inject an [`Arc<dyn ProcessingProgressCallback>`] via
//! [`crate::config::ProcessingConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through its stages and uploads images.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal progress bar, a log, or a
//! request-scoped metrics sink without the library knowing how the host
//! application communicates. The trait is `Send + Sync` because image
//! uploads run concurrently.
//!
//! # Example
//!
//! ```rust
//! use vetscan::{ProcessingProgressCallback, ProcessingConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     uploaded: AtomicUsize,
//! }
//!
//! impl ProcessingProgressCallback for CountingCallback {
//!     fn on_image_uploaded(&self, index: usize, total: usize) {
//!         let done = self.uploaded.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("image {} uploaded ({}/{})", index, done, total);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { uploaded: AtomicUsize::new(0) });
//!
//! let config = ProcessingConfig::builder()
//!     .progress_callback(counter as Arc<dyn ProcessingProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::PipelineStage;
use std::sync::Arc;

/// Called by the pipeline as it processes one upload.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_image_uploaded` and `on_image_failed` may be called concurrently
/// from different tasks. Protect shared mutable state accordingly.
pub trait ProcessingProgressCallback: Send + Sync {
    /// Called once after validation succeeds.
    ///
    /// # Arguments
    /// * `file_name`  — original upload name
    /// * `size_bytes` — size of the PDF
    fn on_processing_start(&self, file_name: &str, size_bytes: usize) {
        let _ = (file_name, size_bytes);
    }

    /// Called when a pipeline stage begins.
    fn on_stage(&self, stage: PipelineStage) {
        let _ = stage;
    }

    /// Called after the structural scan with the number of accepted images.
    fn on_images_scanned(&self, count: usize) {
        let _ = count;
    }

    fn on_image_uploaded(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when one image upload fails. The image is dropped from the report.
    fn on_image_failed(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after the report is persisted.
    ///
    /// # Arguments
    /// * `images_stored`  — images that made it into the report
    /// * `images_scanned` — images the scan accepted
    fn on_processing_complete(&self, images_stored: usize, images_scanned: usize) {
        let _ = (images_stored, images_scanned);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ProcessingProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ProcessingConfig`].
pub type ProgressCallback = Arc<dyn ProcessingProgressCallback>;
