//! Upload processing: the pipeline orchestrator.
//!
//! ## Failure policy
//!
//! ```text
//! validate ─▶ store original ─▶ scan ─▶ upload images ─▶ extract ─▶ map + fallback ─▶ persist
//!   4xx          fatal          never     per image         fatal        never           fatal
//!                               fails     (dropped)                      fails
//! ```
//!
//! Fatal steps return [`ReportError::UploadProcessing`] tagged with the
//! stage. Scan and upload problems become [`ExtractionWarning`]s in the
//! [`ProcessingOutcome`]; the request still succeeds.

use crate::config::ProcessingConfig;
use crate::error::{ExtractionWarning, PipelineStage, ReportError};
use crate::pipeline::mapper::{EntityMapper, MappedFields};
use crate::pipeline::scan::{scan_images, ScanOutcome};
use crate::pipeline::sections::{extract_sections, TextSections};
use crate::pipeline::validate::{validate_pdf, PDF_MIME_TYPE};
use crate::report::{
    CanonicalReport, ClinicalSection, ExtractedDocument, ImageReference, NewReport,
    OwnerSection, PatientSection, ProcessingMetadata, RawImageRecord, ReportFiles, StoredFile,
    StoredReport, StudySection, VeterinarianSection, NOT_DETECTED,
};
use crate::schema::*;
use crate::services::object_store::{image_path, original_pdf_path};
use crate::services::{EntityExtractor, ObjectStore, ReportStore};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A file received from a client.
#[derive(Clone)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    /// Size the client declared; the buffer length when absent.
    pub declared_size: Option<u64>,
}

impl UploadedFile {
    /// A PDF upload with the standard MIME type.
    pub fn pdf(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            mime_type: PDF_MIME_TYPE.to_string(),
            declared_size: None,
        }
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .field("declared_size", &self.declared_size)
            .finish()
    }
}

/// A persisted report plus the non-fatal problems met on the way.
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    pub report: StoredReport,
    pub warnings: Vec<ExtractionWarning>,
    /// Images accepted by the scan, including any that later failed to upload.
    pub images_scanned: usize,
}

/// Sequences one upload through the pipeline against injected collaborators.
///
/// Cheap to share: wrap in an `Arc` and call [`process_upload`](Self::process_upload)
/// from any number of request handlers.
pub struct ReportProcessor {
    config: ProcessingConfig,
    mapper: EntityMapper,
    objects: Arc<dyn ObjectStore>,
    extractor: Arc<dyn EntityExtractor>,
    reports: Arc<dyn ReportStore>,
}

impl fmt::Debug for ReportProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportProcessor")
            .field("config", &self.config)
            .field("aliases", &self.mapper.aliases().entries().len())
            .finish_non_exhaustive()
    }
}

impl ReportProcessor {
    /// Build a processor using the default alias table.
    pub fn new(
        config: ProcessingConfig,
        objects: Arc<dyn ObjectStore>,
        extractor: Arc<dyn EntityExtractor>,
        reports: Arc<dyn ReportStore>,
    ) -> Self {
        Self {
            config,
            mapper: EntityMapper::default(),
            objects,
            extractor,
            reports,
        }
    }

    /// Replace the entity mapper, e.g. one built over a custom alias table.
    pub fn with_mapper(mut self, mapper: EntityMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn report_store(&self) -> &Arc<dyn ReportStore> {
        &self.reports
    }

    /// Run the full pipeline for one upload.
    ///
    /// # Errors
    /// [`ReportError::Validation`] when the file is rejected, otherwise
    /// [`ReportError::UploadProcessing`] for a failed fatal stage. Image
    /// problems never fail the request.
    pub async fn process_upload(
        &self,
        file: UploadedFile,
    ) -> Result<ProcessingOutcome, ReportError> {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        info!(
            "Processing upload {} ({}, {} bytes)",
            request_id,
            file.file_name,
            file.bytes.len()
        );

        // ── Step 1: Validate ─────────────────────────────────────────────
        self.stage(PipelineStage::Validate);
        let declared = file.declared_size.unwrap_or(file.bytes.len() as u64);
        let max = self.config.max_file_size;
        if let Err(e) = validate_pdf(&file.bytes, &file.mime_type, declared, max) {
            warn!("Upload {} rejected: {}", request_id, e);
            return Err(e.into());
        }
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_processing_start(&file.file_name, file.bytes.len());
        }

        let UploadedFile {
            bytes, file_name, ..
        } = file;
        let bytes: Arc<[u8]> = Arc::from(bytes);

        // ── Step 2: Store the original ───────────────────────────────────
        self.stage(PipelineStage::StoreOriginal);
        let pdf_path = original_pdf_path(&file_name, Utc::now().timestamp_millis());
        let original = self
            .objects
            .put(&pdf_path, &bytes, PDF_MIME_TYPE)
            .await
            .map_err(|e| fatal(PipelineStage::StoreOriginal, e))?;

        // ── Step 3: Scan for embedded images ─────────────────────────────
        self.stage(PipelineStage::ScanImages);
        let ScanOutcome {
            images,
            mut warnings,
        } = scan_images(Arc::clone(&bytes), self.config.scan_limits).await;
        let images_scanned = images.len();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_images_scanned(images_scanned);
        }

        // ── Step 4: Upload images (isolated per image) ───────────────────
        // Uploads already issued are not rolled back if this future is
        // dropped; the objects stay orphaned under images/{request_id}/.
        self.stage(PipelineStage::UploadImages);
        let (image_refs, upload_warnings) = self.upload_images(request_id, images).await;
        warnings.extend(upload_warnings);

        // ── Step 5: Entity extraction ────────────────────────────────────
        self.stage(PipelineStage::ExtractEntities);
        let extracted = self
            .extractor
            .process(&bytes)
            .await
            .map_err(|e| fatal(PipelineStage::ExtractEntities, e))?;
        debug!(
            "Extraction returned {} entities over {} page(s)",
            extracted.entities.len(),
            extracted.page_count
        );

        // ── Step 6: Map, backfill, assemble ──────────────────────────────
        self.stage(PipelineStage::MapFields);
        let mapped = self.mapper.map_entities(&extracted.entities);
        let sections = extract_sections(&extracted.text);
        let report = assemble_report(&mapped, &sections, &extracted, image_refs);

        // ── Step 7: Persist ──────────────────────────────────────────────
        self.stage(PipelineStage::Persist);
        let images_stored = report.images.len();
        let record = NewReport {
            report,
            files: ReportFiles {
                original_pdf: StoredFile {
                    url: original.url,
                    path: original.path,
                    file_name,
                    size: bytes.len(),
                },
            },
            processing_time_ms: started.elapsed().as_millis() as u64,
        };
        let stored = self
            .reports
            .create(record)
            .await
            .map_err(|e| fatal(PipelineStage::Persist, e))?;

        info!(
            "Report {} processed: {}/{} images, {} warning(s), {}ms",
            stored.id,
            images_stored,
            images_scanned,
            warnings.len(),
            started.elapsed().as_millis()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_processing_complete(images_stored, images_scanned);
        }

        Ok(ProcessingOutcome {
            report: stored,
            warnings,
            images_scanned,
        })
    }

    /// Upload every image with bounded concurrency.
    ///
    /// Results land in slots sized to the image count, so the returned
    /// references keep scan order whatever order uploads finish in.
    async fn upload_images(
        &self,
        request_id: Uuid,
        images: Vec<RawImageRecord>,
    ) -> (Vec<ImageReference>, Vec<ExtractionWarning>) {
        let total = images.len();
        let mut slots: Vec<Option<ImageReference>> = vec![None; total];
        let mut warnings = Vec::new();
        let objects = &self.objects;
        let callback = self.config.progress_callback.as_ref();

        let results: Vec<(usize, usize, Result<ImageReference, String>)> =
            stream::iter(images.into_iter().enumerate().map(|(slot, image)| async move {
                let path = image_path(request_id, image.index, image.format);
                let result = objects
                    .put(&path, &image.bytes, image.format.content_type())
                    .await
                    .map(|stored| ImageReference {
                        index: image.index,
                        url: stored.url,
                        path: stored.path,
                        width: image.width,
                        height: image.height,
                        format: image.format,
                        size: image.byte_size,
                    })
                    .map_err(|e| e.to_string());
                if let Some(cb) = callback {
                    match &result {
                        Ok(_) => cb.on_image_uploaded(image.index, total),
                        Err(e) => cb.on_image_failed(image.index, total, e),
                    }
                }
                (slot, image.index, result)
            }))
            .buffer_unordered(self.config.upload_concurrency)
            .collect()
            .await;

        for (slot, index, result) in results {
            match result {
                Ok(reference) => {
                    debug!("Image {} uploaded to {}", index, reference.path);
                    slots[slot] = Some(reference);
                }
                Err(detail) => {
                    warn!("Image {} upload failed, dropped: {}", index, detail);
                    warnings.push(ExtractionWarning::ImageUploadFailed { index, detail });
                }
            }
        }
        warnings.sort_by_key(|w| match w {
            ExtractionWarning::ImageUploadFailed { index, .. } => *index,
            ExtractionWarning::Unparseable { .. } => 0,
        });

        (slots.into_iter().flatten().collect(), warnings)
    }

    fn stage(&self, stage: PipelineStage) {
        debug!("Stage: {}", stage);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(stage);
        }
    }
}

fn fatal(stage: PipelineStage, err: impl fmt::Display) -> ReportError {
    error!("Processing failed during {}: {}", stage, err);
    ReportError::at_stage(stage, err)
}

/// Validate and scan a PDF without contacting any collaborator.
pub async fn inspect_images(
    bytes: Vec<u8>,
    config: &ProcessingConfig,
) -> Result<ScanOutcome, ReportError> {
    validate_pdf(&bytes, PDF_MIME_TYPE, bytes.len() as u64, config.max_file_size)?;
    Ok(scan_images(Arc::from(bytes), config.scan_limits).await)
}

// ── Assembly ─────────────────────────────────────────────────────────────

/// Build the fixed-shape report. Every schema field is filled: mapped value
/// first, then (for diagnosis and recommendations only) the text section,
/// then [`NOT_DETECTED`].
pub fn assemble_report(
    mapped: &MappedFields,
    sections: &TextSections,
    extracted: &ExtractedDocument,
    images: Vec<ImageReference>,
) -> CanonicalReport {
    let field = |key: FieldKey| mapped.value(key).unwrap_or(NOT_DETECTED).to_string();
    let field_or = |key: FieldKey, fallback: &str| {
        mapped
            .value(key)
            .or(Some(fallback).filter(|s| !s.is_empty()))
            .unwrap_or(NOT_DETECTED)
            .to_string()
    };

    CanonicalReport {
        patient: PatientSection {
            name: field(PATIENT_NAME),
            species: field(PATIENT_SPECIES),
            breed: field(PATIENT_BREED),
            age: field(PATIENT_AGE),
            weight: field(PATIENT_WEIGHT),
            sex: field(PATIENT_SEX),
        },
        owner: OwnerSection {
            name: field(OWNER_NAME),
            phone: field(OWNER_PHONE),
            email: field(OWNER_EMAIL),
            address: field(OWNER_ADDRESS),
        },
        veterinarian: VeterinarianSection {
            name: field(VET_NAME),
            license: field(VET_LICENSE),
            clinic: field(VET_CLINIC),
        },
        study: StudySection {
            date: field(STUDY_DATE),
            study_type: field(STUDY_TYPE),
        },
        clinical: ClinicalSection {
            diagnosis: field_or(CLINICAL_DIAGNOSIS, &sections.diagnosis),
            observations: field(CLINICAL_OBSERVATIONS),
            recommendations: field_or(CLINICAL_RECOMMENDATIONS, &sections.recommendations),
            measurements: field(CLINICAL_MEASUREMENTS),
        },
        raw_text: extracted.text.clone(),
        images,
        processing_metadata: ProcessingMetadata {
            pages_processed: extracted.page_count.max(1),
            entities_detected: extracted.entities.len(),
            text_length: extracted.text.encode_utf16().count(),
            processed_at: Utc::now(),
        },
    }
}
