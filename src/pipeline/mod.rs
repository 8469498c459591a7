//! Pure pipeline stages for report processing.
//!
//! Nothing in here performs network I/O; collaborators live in
//! [`crate::services`] and the sequencing lives in [`crate::process`].
//!
//! ## Data Flow
//!
//! ```text
//! validate ──▶ scan ──────────────▶ (upload, in process)
//!                                         │
//! (extract, in services) ──▶ mapper ──────┤
//!            │                            ├──▶ report
//!            └──────────▶ sections ───────┘
//! ```
//!
//! 1. [`validate`] — MIME, size and signature checks; list query normalisation
//! 2. [`scan`]     — walk the PDF object table for embedded raster images;
//!    runs in `spawn_blocking` because parsing is CPU-bound
//! 3. [`mapper`]   — route extractor entities onto schema fields by label
//! 4. [`sections`] — carve diagnosis/recommendations out of raw text for
//!    fields the mapper left empty
//! 5. [`sniff`]    — magic-byte image format detection and byte formatting

pub mod mapper;
pub mod scan;
pub mod sections;
pub mod sniff;
pub mod validate;
