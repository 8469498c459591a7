//! Configuration types for report processing.
//!
//! All processing behaviour is controlled through [`ProcessingConfig`], built
//! via its [`ProcessingConfigBuilder`]. One struct holds every knob so a
//! config can be shared across request handlers behind an `Arc` and logged
//! as a unit.
//!
//! # Design choice: builder over constructor
//! Callers set only what they care about and rely on the documented
//! defaults for the rest; `build()` is the single place limits are checked.

use crate::error::ReportError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Default maximum accepted upload size (10 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * MIB;

/// Upper bound for concurrent image uploads.
pub const MAX_UPLOAD_CONCURRENCY: usize = 8;

/// Acceptance thresholds for scanned images. Both bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanLimits {
    /// Payloads of this many bytes or fewer are rejected. Default: 1000.
    pub min_bytes: usize,

    /// Images whose width or height is this value or less are rejected.
    /// Default: 50.
    ///
    /// Filters out logos, bullets and icons that clinic templates embed on
    /// every page.
    pub min_dimension: u32,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            min_bytes: 1000,
            min_dimension: 50,
        }
    }
}

impl ScanLimits {
    pub fn accepts(&self, width: u32, height: u32, byte_size: usize) -> bool {
        byte_size > self.min_bytes && width > self.min_dimension && height > self.min_dimension
    }
}

/// Configuration for the upload pipeline.
///
/// Built via [`ProcessingConfig::builder()`] or using
/// [`ProcessingConfig::default()`].
///
/// # Example
/// ```rust
/// use vetscan::ProcessingConfig;
///
/// let config = ProcessingConfig::builder()
///     .max_file_size(5 * 1024 * 1024)
///     .upload_concurrency(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.upload_concurrency, 2);
/// ```
#[derive(Clone)]
pub struct ProcessingConfig {
    /// Largest accepted upload in bytes (inclusive). Default: 10 MiB.
    pub max_file_size: u64,

    /// Number of image uploads in flight at once. Range: 1–8. Default: 4.
    ///
    /// Uploads are network-bound; a handful in parallel hides object-store
    /// latency without opening a connection per image on large reports.
    pub upload_concurrency: usize,

    /// Image acceptance thresholds used by the structural scan.
    pub scan_limits: ScanLimits,

    /// Expose internal error detail in client-facing messages. Default: false.
    pub debug_errors: bool,

    /// Optional observer for per-stage progress.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            upload_concurrency: 4,
            scan_limits: ScanLimits::default(),
            debug_errors: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ProcessingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingConfig")
            .field("max_file_size", &self.max_file_size)
            .field("upload_concurrency", &self.upload_concurrency)
            .field("scan_limits", &self.scan_limits)
            .field("debug_errors", &self.debug_errors)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn ProcessingProgressCallback>"),
            )
            .finish()
    }
}

impl ProcessingConfig {
    /// Create a new builder for `ProcessingConfig`.
    pub fn builder() -> ProcessingConfigBuilder {
        ProcessingConfigBuilder {
            config: Self::default(),
        }
    }

    /// `max_file_size` in whole MiB, for user-facing messages.
    pub fn max_file_size_mib(&self) -> u64 {
        self.max_file_size / MIB
    }
}

/// Builder for [`ProcessingConfig`].
pub struct ProcessingConfigBuilder {
    config: ProcessingConfig,
}

impl fmt::Debug for ProcessingConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ProcessingConfigBuilder {
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    pub fn upload_concurrency(mut self, n: usize) -> Self {
        self.config.upload_concurrency = n.clamp(1, MAX_UPLOAD_CONCURRENCY);
        self
    }

    pub fn scan_limits(mut self, limits: ScanLimits) -> Self {
        self.config.scan_limits = limits;
        self
    }

    pub fn debug_errors(mut self, v: bool) -> Self {
        self.config.debug_errors = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProcessingConfig, ReportError> {
        let c = &self.config;
        if c.max_file_size == 0 {
            return Err(ReportError::InvalidConfig(
                "max_file_size must be > 0".into(),
            ));
        }
        if c.upload_concurrency == 0 || c.upload_concurrency > MAX_UPLOAD_CONCURRENCY {
            return Err(ReportError::InvalidConfig(format!(
                "upload_concurrency must be 1–{}, got {}",
                MAX_UPLOAD_CONCURRENCY, c.upload_concurrency
            )));
        }
        Ok(self.config)
    }
}
