//! Error types for the vetscan library.
//!
//! Three tiers mirror how much of a failure the caller ever sees:
//!
//! * [`ReportError`] — **Fatal**: the upload cannot be turned into a stored
//!   report (invalid file, object store down, extraction engine failed,
//!   persistence failed). Returned as `Err(ReportError)` from
//!   [`crate::process::ReportProcessor::process_upload`].
//!
//! * [`ExtractionWarning`] — **Non-fatal**: the document could not be walked
//!   or one image failed to upload. Logged and collected in
//!   [`crate::process::ProcessingOutcome`]; the request still succeeds with
//!   a shorter `images` list.
//!
//! * [`ServiceError`] — what an external collaborator (object store,
//!   extraction engine, document store) reports. The orchestrator folds it
//!   into a [`ReportError::UploadProcessing`] at the stage where it happened.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Message shown to API clients for any processing failure outside debug mode.
pub const GENERIC_PROCESSING_MESSAGE: &str = "Contacte al administrador";

/// All fatal errors returned by the vetscan library.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The uploaded file was rejected before any processing started.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A fatal pipeline step failed. `detail` is for logs and debug mode only.
    #[error("Error procesando reporte durante {stage}")]
    UploadProcessing { stage: PipelineStage, detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ReportError {
    pub(crate) fn at_stage(stage: PipelineStage, err: impl fmt::Display) -> Self {
        ReportError::UploadProcessing {
            stage,
            detail: err.to_string(),
        }
    }

    /// True when the client is at fault (maps to a 4xx response).
    pub fn is_client_error(&self) -> bool {
        matches!(self, ReportError::Validation(_))
    }

    /// The message a client is allowed to see.
    ///
    /// Validation messages are always specific. Everything else collapses to
    /// a generic message unless `debug` is set.
    pub fn public_message(&self, debug: bool) -> String {
        match self {
            ReportError::Validation(e) => e.to_string(),
            ReportError::UploadProcessing { detail, .. } if debug => detail.clone(),
            ReportError::InvalidConfig(msg) if debug => msg.clone(),
            _ => GENERIC_PROCESSING_MESSAGE.to_string(),
        }
    }
}

/// Why an uploaded file was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No se proporcionó ningún archivo")]
    MissingFile,

    #[error("Tipo de archivo no permitido: {mime}. Solo se aceptan archivos PDF.")]
    UnsupportedMimeType { mime: String },

    #[error("El archivo excede el tamaño máximo permitido ({max_mib} MB)")]
    TooLarge { size: u64, max_mib: u64 },

    #[error("El archivo está vacío o corrupto")]
    Empty,

    #[error("El archivo no es un PDF válido")]
    NotAPdf,
}

/// A non-fatal problem with a single image.
///
/// Never surfaced to the caller as an error.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExtractionWarning {
    /// The document could not be walked; no images were recovered.
    #[error("PDF structure could not be parsed: {detail}")]
    Unparseable { detail: String },

    /// An accepted image failed to upload and was dropped.
    #[error("Image {index}: upload failed: {detail}")]
    ImageUploadFailed { index: usize, detail: String },
}

/// Failure reported by an external collaborator.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("entity extraction error: {0}")]
    Extraction(String),

    #[error("document store error: {0}")]
    Database(String),

    #[error("HTTP {status} from {service}: {detail}")]
    Http {
        service: &'static str,
        status: u16,
        detail: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The orchestrator step a fatal error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineStage {
    Validate,
    StoreOriginal,
    ScanImages,
    UploadImages,
    ExtractEntities,
    MapFields,
    Persist,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Validate => "validate",
            PipelineStage::StoreOriginal => "store-original",
            PipelineStage::ScanImages => "scan-images",
            PipelineStage::UploadImages => "upload-images",
            PipelineStage::ExtractEntities => "extract-entities",
            PipelineStage::MapFields => "map-fields",
            PipelineStage::Persist => "persist",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_error_hides_detail_outside_debug() {
        let e = ReportError::at_stage(PipelineStage::Persist, "connection refused by 10.0.0.3");
        assert_eq!(e.public_message(false), GENERIC_PROCESSING_MESSAGE);
        assert!(e.public_message(true).contains("10.0.0.3"));
        assert!(!e.is_client_error());
    }

    #[test]
    fn validation_error_is_always_specific() {
        let e: ReportError = ValidationError::UnsupportedMimeType {
            mime: "image/jpeg".into(),
        }
        .into();
        assert!(e.is_client_error());
        let msg = e.public_message(false);
        assert!(msg.contains("image/jpeg"), "got: {msg}");
        assert!(msg.contains("PDF"));
    }

    #[test]
    fn too_large_display_mentions_limit() {
        let e = ValidationError::TooLarge {
            size: 25 * 1024 * 1024,
            max_mib: 10,
        };
        assert!(e.to_string().contains("10 MB"));
    }

    #[test]
    fn stage_display() {
        let e = ReportError::at_stage(PipelineStage::ExtractEntities, "boom");
        assert!(e.to_string().contains("extract-entities"));
    }

    #[test]
    fn warning_serialises_with_kind_tag() {
        let w = ExtractionWarning::ImageUploadFailed {
            index: 1,
            detail: "503".into(),
        };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["kind"], "imageUploadFailed");
        assert_eq!(json["index"], 1);
    }
}
