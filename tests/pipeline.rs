//! Integration tests for the full upload pipeline.
//!
//! PDFs are built in memory with lopdf and every collaborator is an
//! in-memory implementation, so these run offline.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, Stream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;
use vetscan::report::{NewReport, StoredReport};
use vetscan::services::{
    EntityExtractor, MemoryObjectStore, MemoryReportStore, ObjectStore, ReportPage,
    ReportPatch, ReportQuery, ReportStatistics, ReportStore, StaticExtractor, StoredObject,
};
use vetscan::{
    scan, EntityRecord, ExtractedDocument, ExtractionWarning, ImageFormat, PipelineStage,
    ProcessingConfig, ProcessingProgressCallback, ReportError, ReportProcessor, ServiceError,
    UploadedFile, ValidationError, NOT_DETECTED,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// (width, height, jpeg?, payload length)
type Img = (i64, i64, bool, usize);

fn build_pdf(images: &[Img]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();

    for &(width, height, jpeg, len) in images {
        let mut content = vec![0x42u8; len];
        let mut dict = dictionary! {
            "Type" => Object::Name(b"XObject".to_vec()),
            "Subtype" => Object::Name(b"Image".to_vec()),
            "Width" => Object::Integer(width),
            "Height" => Object::Integer(height),
            "BitsPerComponent" => Object::Integer(8),
        };
        if jpeg {
            content[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
            dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
        }
        let mut stream = Stream::new(dict, content);
        stream.allows_compression = false;
        let img_id = doc.add_object(stream);

        let page_id = doc.add_object(dictionary! {
            "Type" => Object::Name(b"Page".to_vec()),
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => Object::Reference(img_id) },
            },
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => Object::Name(b"Pages".to_vec()),
            "Kids" => kids,
            "Count" => Object::Integer(count),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => Object::Name(b"Catalog".to_vec()),
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn extracted(text: &str, entities: Vec<EntityRecord>) -> ExtractedDocument {
    ExtractedDocument {
        text: text.to_string(),
        entities,
        page_count: 2,
    }
}

struct Harness {
    processor: ReportProcessor,
    objects: Arc<MemoryObjectStore>,
    reports: Arc<MemoryReportStore>,
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("vetscan=debug"))
        .with_test_writer()
        .try_init();
}

fn harness(config: ProcessingConfig, doc: ExtractedDocument) -> Harness {
    init_logging();
    let objects = Arc::new(MemoryObjectStore::new());
    let reports = Arc::new(MemoryReportStore::new());
    let processor = ReportProcessor::new(
        config,
        objects.clone(),
        Arc::new(StaticExtractor::new(doc)),
        reports.clone(),
    );
    Harness {
        processor,
        objects,
        reports,
    }
}

/// Fails any put whose path contains `needle`.
struct FlakyStore {
    inner: MemoryObjectStore,
    needle: &'static str,
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredObject, ServiceError> {
        if path.contains(self.needle) {
            return Err(ServiceError::Storage("bucket unavailable".into()));
        }
        self.inner.put(path, bytes, content_type).await
    }

    async fn exists(&self) -> bool {
        true
    }
}

/// Sleeps longer for lower image indices, so uploads finish in reverse.
#[derive(Default)]
struct SlowStore {
    inner: MemoryObjectStore,
    finished: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStore for SlowStore {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredObject, ServiceError> {
        if let Some(index) = image_index(path) {
            let delay = 30 * (4 - index.min(4) as u64);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let stored = self.inner.put(path, bytes, content_type).await?;
        self.finished.lock().unwrap().push(path.to_string());
        Ok(stored)
    }

    async fn exists(&self) -> bool {
        true
    }
}

/// `images/{request}/image-{i}.{ext}` -> `i`
fn image_index(path: &str) -> Option<usize> {
    let name = path.rsplit('/').next()?.strip_prefix("image-")?;
    name.split('.').next()?.parse().ok()
}

/// Rejects every write and delegates the rest.
#[derive(Default)]
struct ReadOnlyReports {
    inner: MemoryReportStore,
}

#[async_trait]
impl ReportStore for ReadOnlyReports {
    async fn create(&self, _report: NewReport) -> Result<StoredReport, ServiceError> {
        Err(ServiceError::Database("write quota exhausted".into()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<StoredReport>, ServiceError> {
        self.inner.get(id).await
    }

    async fn update(
        &self,
        id: Uuid,
        patch: ReportPatch,
    ) -> Result<Option<StoredReport>, ServiceError> {
        self.inner.update(id, patch).await
    }

    async fn query(&self, query: &ReportQuery) -> Result<ReportPage, ServiceError> {
        self.inner.query(query).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, ServiceError> {
        self.inner.delete(id).await
    }

    async fn statistics(&self) -> Result<ReportStatistics, ServiceError> {
        self.inner.statistics().await
    }

    async fn health(&self) -> bool {
        true
    }
}

struct FailingExtractor;

#[async_trait]
impl EntityExtractor for FailingExtractor {
    async fn process(&self, _pdf_bytes: &[u8]) -> Result<ExtractedDocument, ServiceError> {
        Err(ServiceError::Extraction("quota exceeded for processor".into()))
    }
}

// ── End to end ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_two_page_report_keeps_only_the_ultrasound_frame() {
    let pdf = build_pdf(&[(200, 300, true, 6000), (20, 20, false, 300)]);
    let h = harness(
        ProcessingConfig::default(),
        extracted(
            "Paciente: Rocky\nDiagnóstico: Hepatomegalia leve\nRecomendaciones: Control en 30 días",
            vec![
                EntityRecord::new("nombre_paciente", "Rocky", 0.95),
                EntityRecord::new("especie", "Canino", 0.91),
                EntityRecord::new("propietario", "Ana Pérez", 0.88),
            ],
        ),
    );

    let outcome = h
        .processor
        .process_upload(UploadedFile::pdf("informe rocky.pdf", pdf.clone()))
        .await
        .unwrap();

    let report = &outcome.report.report;
    assert_eq!(outcome.images_scanned, 1);
    assert!(outcome.warnings.is_empty());
    assert_eq!(report.images.len(), 1);
    assert_eq!(report.images[0].index, 0);
    assert_eq!(report.images[0].format, ImageFormat::Jpeg);
    assert_eq!((report.images[0].width, report.images[0].height), (200, 300));
    assert!(report.images[0].path.ends_with("image-0.jpg"));

    assert_eq!(report.patient.name, "Rocky");
    assert_eq!(report.patient.species, "Canino");
    assert_eq!(report.owner.name, "Ana Pérez");
    assert_eq!(report.clinical.diagnosis, "Hepatomegalia leve");
    assert_eq!(report.clinical.recommendations, "Control en 30 días");
    assert_eq!(report.processing_metadata.entities_detected, 3);
    assert_eq!(report.processing_metadata.pages_processed, 2);

    // Original PDF plus one image.
    assert_eq!(h.objects.len(), 2);
    let original = &outcome.report.files.original_pdf;
    assert!(original.path.starts_with("reports/"));
    assert!(original.path.ends_with("informe_rocky.pdf"));
    assert_eq!(original.size, pdf.len());
    assert_eq!(h.objects.get(&original.path).unwrap().bytes, pdf);

    let stored = h.reports.get(outcome.report.id).await.unwrap().unwrap();
    assert_eq!(stored.id, outcome.report.id);
    assert_eq!(stored.report.images, report.images);
}

#[tokio::test]
async fn test_failed_image_upload_is_dropped_with_warning() {
    let pdf = build_pdf(&[
        (400, 300, true, 4000),
        (400, 300, true, 4000),
        (400, 300, true, 4000),
    ]);
    let objects = Arc::new(FlakyStore {
        inner: MemoryObjectStore::new(),
        needle: "image-1.",
    });
    let processor = ReportProcessor::new(
        ProcessingConfig::default(),
        objects.clone(),
        Arc::new(StaticExtractor::new(extracted("", vec![]))),
        Arc::new(MemoryReportStore::new()),
    );

    let outcome = processor
        .process_upload(UploadedFile::pdf("r.pdf", pdf))
        .await
        .unwrap();

    let indices: Vec<usize> = outcome.report.report.images.iter().map(|i| i.index).collect();
    assert_eq!(indices, vec![0, 2]);
    assert_eq!(outcome.images_scanned, 3);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(matches!(
        outcome.warnings[0],
        ExtractionWarning::ImageUploadFailed { index: 1, .. }
    ));
}

#[tokio::test]
async fn test_text_fallback_never_overwrites_mapped_fields() {
    let pdf = build_pdf(&[]);
    let h = harness(
        ProcessingConfig::default(),
        extracted(
            "Diagnóstico: texto del informe\nRecomendaciones: dieta renal",
            vec![EntityRecord::new("Diagnóstico", "Nefropatía crónica", 0.3)],
        ),
    );
    let outcome = h
        .processor
        .process_upload(UploadedFile::pdf("r.pdf", pdf))
        .await
        .unwrap();
    let clinical = &outcome.report.report.clinical;
    assert_eq!(clinical.diagnosis, "Nefropatía crónica");
    assert_eq!(clinical.recommendations, "dieta renal");
}

#[tokio::test]
async fn test_empty_extraction_yields_sentinels_everywhere() {
    let pdf = build_pdf(&[]);
    let h = harness(ProcessingConfig::default(), ExtractedDocument::default());
    let outcome = h
        .processor
        .process_upload(UploadedFile::pdf("r.pdf", pdf))
        .await
        .unwrap();

    let json = serde_json::to_value(&outcome.report).unwrap();
    for section in ["patient", "owner", "veterinarian", "study", "clinical"] {
        for (field, value) in json[section].as_object().unwrap() {
            assert_eq!(value, NOT_DETECTED, "{section}.{field}");
        }
    }
    assert_eq!(json["processingMetadata"]["pagesProcessed"], 1);
    assert_eq!(json["processingMetadata"]["textLength"], 0);
    assert_eq!(json["status"], "processed");
    assert!(json["images"].as_array().unwrap().is_empty());
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_validation_failure_stores_nothing() {
    let h = harness(ProcessingConfig::default(), ExtractedDocument::default());
    let mut file = UploadedFile::pdf("foto.pdf", b"\xFF\xD8\xFF\xE0 not a pdf".to_vec());
    let err = h.processor.process_upload(file.clone()).await.unwrap_err();
    assert!(matches!(err, ReportError::Validation(ValidationError::NotAPdf)));
    assert!(err.is_client_error());

    file.mime_type = "image/jpeg".into();
    let err = h.processor.process_upload(file).await.unwrap_err();
    assert!(matches!(
        err,
        ReportError::Validation(ValidationError::UnsupportedMimeType { .. })
    ));

    assert!(h.objects.is_empty());
    assert_eq!(h.reports.statistics().await.unwrap().total_reports, 0);
}

#[tokio::test]
async fn test_oversize_declared_upload_is_rejected() {
    let config = ProcessingConfig::builder()
        .max_file_size(1024)
        .build()
        .unwrap();
    let h = harness(config, ExtractedDocument::default());
    let mut file = UploadedFile::pdf("big.pdf", build_pdf(&[]));
    file.declared_size = Some(4096);
    let err = h.processor.process_upload(file).await.unwrap_err();
    assert!(matches!(
        err,
        ReportError::Validation(ValidationError::TooLarge { size: 4096, .. })
    ));
}

#[tokio::test]
async fn test_extractor_failure_is_fatal_and_generic() {
    let reports = Arc::new(MemoryReportStore::new());
    let processor = ReportProcessor::new(
        ProcessingConfig::default(),
        Arc::new(MemoryObjectStore::new()),
        Arc::new(FailingExtractor),
        reports.clone(),
    );
    let err = processor
        .process_upload(UploadedFile::pdf("r.pdf", build_pdf(&[(100, 100, true, 2000)])))
        .await
        .unwrap_err();

    match &err {
        ReportError::UploadProcessing { stage, detail } => {
            assert_eq!(*stage, PipelineStage::ExtractEntities);
            assert!(detail.contains("quota"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_client_error());
    assert_eq!(err.public_message(false), "Contacte al administrador");
    assert!(err.public_message(true).contains("quota"));
    assert_eq!(reports.statistics().await.unwrap().total_reports, 0);
}

#[tokio::test]
async fn test_unparseable_pdf_body_still_produces_a_report() {
    let h = harness(ProcessingConfig::default(), extracted("", vec![]));
    let bytes = b"%PDF-1.4\nthis is not a real object table".to_vec();
    let outcome = h
        .processor
        .process_upload(UploadedFile::pdf("broken.pdf", bytes))
        .await
        .unwrap();
    assert!(outcome.report.report.images.is_empty());
    assert!(matches!(
        outcome.warnings.as_slice(),
        [ExtractionWarning::Unparseable { .. }]
    ));
}

#[tokio::test]
async fn test_original_pdf_storage_failure_is_fatal() {
    init_logging();
    let objects = Arc::new(FlakyStore {
        inner: MemoryObjectStore::new(),
        needle: "reports/",
    });
    let reports = Arc::new(MemoryReportStore::new());
    let processor = ReportProcessor::new(
        ProcessingConfig::default(),
        objects.clone(),
        Arc::new(StaticExtractor::new(extracted("", vec![]))),
        reports.clone(),
    );

    let err = processor
        .process_upload(UploadedFile::pdf("r.pdf", build_pdf(&[(300, 300, true, 3000)])))
        .await
        .unwrap_err();

    match &err {
        ReportError::UploadProcessing { stage, detail } => {
            assert_eq!(*stage, PipelineStage::StoreOriginal);
            assert!(detail.contains("bucket unavailable"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_client_error());
    // Nothing after the failed step ran.
    assert!(objects.inner.is_empty());
    assert_eq!(reports.statistics().await.unwrap().total_reports, 0);
}

#[tokio::test]
async fn test_report_persist_failure_is_fatal() {
    init_logging();
    let objects = Arc::new(MemoryObjectStore::new());
    let reports = Arc::new(ReadOnlyReports::default());
    let processor = ReportProcessor::new(
        ProcessingConfig::default(),
        objects.clone(),
        Arc::new(StaticExtractor::new(extracted(
            "",
            vec![EntityRecord::new("paciente", "Toby", 0.9)],
        ))),
        reports.clone(),
    );

    let err = processor
        .process_upload(UploadedFile::pdf("r.pdf", build_pdf(&[(300, 300, true, 3000)])))
        .await
        .unwrap_err();

    match &err {
        ReportError::UploadProcessing { stage, detail } => {
            assert_eq!(*stage, PipelineStage::Persist);
            assert!(detail.contains("write quota exhausted"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.public_message(false), "Contacte al administrador");
    assert_eq!(reports.statistics().await.unwrap().total_reports, 0);
    // Stored objects are not rolled back.
    assert_eq!(objects.len(), 2);
}

// ── Upload ordering ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_out_of_order_uploads_keep_scan_order() {
    init_logging();
    let objects = Arc::new(SlowStore::default());
    let config = ProcessingConfig::builder()
        .upload_concurrency(4)
        .build()
        .unwrap();
    let processor = ReportProcessor::new(
        config,
        objects.clone(),
        Arc::new(StaticExtractor::new(extracted("", vec![]))),
        Arc::new(MemoryReportStore::new()),
    );
    let pdf = build_pdf(&[
        (100, 100, true, 2000),
        (200, 100, false, 2000),
        (300, 100, true, 2000),
        (400, 100, true, 2000),
    ]);

    let outcome = processor
        .process_upload(UploadedFile::pdf("r.pdf", pdf))
        .await
        .unwrap();

    let finished: Vec<usize> = objects
        .finished
        .lock()
        .unwrap()
        .iter()
        .filter_map(|p| image_index(p))
        .collect();
    assert_eq!(finished, vec![3, 2, 1, 0]);

    let images = &outcome.report.report.images;
    assert_eq!(images.len(), 4);
    for (i, image) in images.iter().enumerate() {
        assert_eq!(image.index, i);
        assert_eq!(image.width, 100 * (i as u32 + 1));
        assert_eq!(image_index(&image.path), Some(i));
        assert!(image.url.ends_with(&image.path));
    }
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    stages: Mutex<Vec<PipelineStage>>,
    uploaded: AtomicUsize,
    failed: AtomicUsize,
    complete: Mutex<Option<(usize, usize)>>,
}

impl ProcessingProgressCallback for Recorder {
    fn on_stage(&self, stage: PipelineStage) {
        self.stages.lock().unwrap().push(stage);
    }

    fn on_image_uploaded(&self, _index: usize, _total: usize) {
        self.uploaded.fetch_add(1, Ordering::SeqCst);
    }

    fn on_image_failed(&self, _index: usize, _total: usize, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_processing_complete(&self, images_stored: usize, images_scanned: usize) {
        *self.complete.lock().unwrap() = Some((images_stored, images_scanned));
    }
}

#[tokio::test]
async fn test_progress_callback_sees_every_stage() {
    let recorder = Arc::new(Recorder::default());
    let config = ProcessingConfig::builder()
        .upload_concurrency(2)
        .progress_callback(recorder.clone() as Arc<dyn ProcessingProgressCallback>)
        .build()
        .unwrap();
    let objects = Arc::new(FlakyStore {
        inner: MemoryObjectStore::new(),
        needle: "image-0.",
    });
    let processor = ReportProcessor::new(
        config,
        objects,
        Arc::new(StaticExtractor::new(extracted("", vec![]))),
        Arc::new(MemoryReportStore::new()),
    );
    processor
        .process_upload(UploadedFile::pdf(
            "r.pdf",
            build_pdf(&[(300, 300, true, 3000), (300, 300, true, 3000)]),
        ))
        .await
        .unwrap();

    assert_eq!(
        *recorder.stages.lock().unwrap(),
        vec![
            PipelineStage::Validate,
            PipelineStage::StoreOriginal,
            PipelineStage::ScanImages,
            PipelineStage::UploadImages,
            PipelineStage::ExtractEntities,
            PipelineStage::MapFields,
            PipelineStage::Persist,
        ]
    );
    assert_eq!(recorder.uploaded.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.failed.load(Ordering::SeqCst), 1);
    assert_eq!(*recorder.complete.lock().unwrap(), Some((1, 2)));
}

// ── Scan ─────────────────────────────────────────────────────────────────────

#[test]
fn test_scan_is_deterministic() {
    let pdf = build_pdf(&[(640, 480, true, 5000), (64, 64, false, 2000), (51, 51, true, 1001)]);
    let first = scan(&pdf);
    let second = scan(&pdf);
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
    assert_eq!(first[1].format, ImageFormat::Png);
    let indices: Vec<usize> = first.iter().map(|i| i.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
}
