//! External collaborators behind traits.
//!
//! The orchestrator only ever talks to these three seams. Each has a
//! production implementation and an in-memory one for tests and dry runs:
//!
//! | Trait | Implementations |
//! |-------|-----------------|
//! | [`ObjectStore`] | [`FsObjectStore`], [`MemoryObjectStore`] |
//! | [`EntityExtractor`] | [`DocumentAiExtractor`], [`StaticExtractor`] |
//! | [`ReportStore`] | [`MemoryReportStore`] |

use crate::error::ServiceError;
use crate::report::{ExtractedDocument, NewReport, StoredReport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod document_ai;
pub mod object_store;
pub mod report_store;

pub use document_ai::{DocumentAiExtractor, StaticExtractor};
pub use object_store::{FsObjectStore, MemoryObjectStore};
pub use report_store::{
    MemoryReportStore, ReportPage, ReportPatch, ReportQuery, ReportStatistics,
};

/// Location of a stored binary object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub url: String,
    pub path: String,
}

/// Binary object storage for the original PDF and extracted images.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredObject, ServiceError>;

    /// True when the backing store is reachable.
    async fn exists(&self) -> bool;
}

/// The entity-extraction engine. Called once per upload, never retried.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn process(&self, pdf_bytes: &[u8]) -> Result<ExtractedDocument, ServiceError>;
}

/// Document store for processed reports. Assigns permanent identifiers.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn create(&self, report: NewReport) -> Result<StoredReport, ServiceError>;

    async fn get(&self, id: Uuid) -> Result<Option<StoredReport>, ServiceError>;

    /// Apply `patch`; `Ok(None)` when no report has this id.
    async fn update(&self, id: Uuid, patch: ReportPatch)
        -> Result<Option<StoredReport>, ServiceError>;

    async fn query(&self, query: &ReportQuery) -> Result<ReportPage, ServiceError>;

    /// Soft delete. `Ok(false)` when no report has this id.
    async fn delete(&self, id: Uuid) -> Result<bool, ServiceError>;

    async fn statistics(&self) -> Result<ReportStatistics, ServiceError>;

    async fn health(&self) -> bool;
}
