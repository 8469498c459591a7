//! Data model: scanned images, entity records, and the canonical report.
//!
//! [`CanonicalReport`] is the wire contract exposed to API consumers. Its
//! field names are fixed; every schema field is a plain `String` that is
//! never absent, holding [`NOT_DETECTED`] when no source produced a value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Placeholder for a schema field no source could fill.
pub const NOT_DETECTED: &str = "No detectado";

// ── Scanner output ───────────────────────────────────────────────────────

/// Encoding of an embedded image, serialised as its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    #[serde(rename = "jpg")]
    Jpeg,
    #[serde(rename = "png")]
    Png,
    #[serde(rename = "gif")]
    Gif,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.extension())
    }
}

/// An image accepted by the structural scanner.
#[derive(Clone, PartialEq, Eq)]
pub struct RawImageRecord {
    /// Zero-based ordinal in discovery order. Not a PDF object number.
    pub index: usize,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub byte_size: usize,
}

impl fmt::Debug for RawImageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawImageRecord")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("byte_size", &self.byte_size)
            .finish()
    }
}

/// Where an uploaded image ended up. `index` is the scan-time ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub index: usize,
    pub url: String,
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub size: usize,
}

// ── Extraction engine output ─────────────────────────────────────────────

/// One typed span reported by the entity-extraction engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub type_label: String,
    pub text: String,
    /// Native engine scale, 0.0–1.0.
    pub confidence: f32,
}

impl EntityRecord {
    pub fn new(type_label: impl Into<String>, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            type_label: type_label.into(),
            text: text.into(),
            confidence,
        }
    }
}

/// Everything the extraction engine returned for one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedDocument {
    pub text: String,
    pub entities: Vec<EntityRecord>,
    pub page_count: usize,
}

/// A mapped value with its confidence as an integer percentage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: String,
    pub confidence: u8,
}

// ── Canonical schema ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientSection {
    pub name: String,
    pub species: String,
    pub breed: String,
    pub age: String,
    pub weight: String,
    pub sex: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSection {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VeterinarianSection {
    pub name: String,
    pub license: String,
    pub clinic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudySection {
    pub date: String,
    #[serde(rename = "type")]
    pub study_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalSection {
    pub diagnosis: String,
    pub observations: String,
    pub recommendations: String,
    pub measurements: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetadata {
    pub pages_processed: usize,
    pub entities_detected: usize,
    pub text_length: usize,
    pub processed_at: DateTime<Utc>,
}

/// The fixed-shape report assembled for every processed upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalReport {
    pub patient: PatientSection,
    pub owner: OwnerSection,
    pub veterinarian: VeterinarianSection,
    pub study: StudySection,
    pub clinical: ClinicalSection,
    pub raw_text: String,
    pub images: Vec<ImageReference>,
    pub processing_metadata: ProcessingMetadata,
}

// ── Persisted record ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Processed,
    Deleted,
}

/// The original PDF as stored in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub url: String,
    pub path: String,
    pub file_name: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFiles {
    pub original_pdf: StoredFile,
}

/// What the orchestrator hands to the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReport {
    #[serde(flatten)]
    pub report: CanonicalReport,
    pub files: ReportFiles,
    pub processing_time_ms: u64,
}

/// A report as persisted, carrying the store-assigned identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReport {
    pub id: Uuid,
    #[serde(flatten)]
    pub report: CanonicalReport,
    pub files: ReportFiles,
    pub processing_time_ms: u64,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}
