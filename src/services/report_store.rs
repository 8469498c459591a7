//! In-memory document store with an optional JSON snapshot.
//!
//! Reports are kept in insertion order. When a snapshot path is configured
//! the whole collection is written after every mutation: serialised to a
//! temporary file in the same directory, then renamed over the snapshot so
//! a crash never leaves a half-written file behind.

use super::ReportStore;
use crate::error::ServiceError;
use crate::report::{
    ClinicalSection, NewReport, OwnerSection, PatientSection, ReportStatus, StoredReport,
    StudySection, VeterinarianSection,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Species bucket for reports without one.
const UNKNOWN_SPECIES: &str = "Desconocido";

/// Partial update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPatch {
    pub patient: Option<PatientSection>,
    pub owner: Option<OwnerSection>,
    pub veterinarian: Option<VeterinarianSection>,
    pub study: Option<StudySection>,
    pub clinical: Option<ClinicalSection>,
    pub status: Option<ReportStatus>,
}

/// List query. Build from raw parameters with
/// [`crate::pipeline::validate::normalize_list_params`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportQuery {
    /// Page size, 1–100.
    pub limit: usize,
    /// 1-based page, used only when `start_after` is absent.
    pub page: usize,
    /// Resume after this report id.
    pub start_after: Option<Uuid>,
    pub patient_name: Option<String>,
    pub owner_name: Option<String>,
    /// Inclusive lower bound on `createdAt`.
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `createdAt`.
    pub date_to: Option<DateTime<Utc>>,
}

impl Default for ReportQuery {
    fn default() -> Self {
        Self {
            limit: crate::pipeline::validate::DEFAULT_PAGE_LIMIT,
            page: 1,
            start_after: None,
            patient_name: None,
            owner_name: None,
            date_from: None,
            date_to: None,
        }
    }
}

impl ReportQuery {
    fn matches(&self, r: &StoredReport) -> bool {
        let contains = |haystack: &str, needle: &Option<String>| {
            needle
                .as_ref()
                .map_or(true, |n| haystack.to_lowercase().contains(&n.to_lowercase()))
        };
        contains(&r.report.patient.name, &self.patient_name)
            && contains(&r.report.owner.name, &self.owner_name)
            && self.date_from.map_or(true, |from| r.created_at >= from)
            && self.date_to.map_or(true, |to| r.created_at <= to)
    }
}

/// One page of results.
///
/// Filters apply after the page window is cut, so `count` may be smaller
/// than `limit` while `has_more` is still true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPage {
    pub items: Vec<StoredReport>,
    pub count: usize,
    pub has_more: bool,
    pub last_id: Option<Uuid>,
}

/// Aggregates over processed (not deleted) reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatistics {
    pub total_reports: usize,
    pub species_distribution: BTreeMap<String, usize>,
    pub reports_per_day: BTreeMap<String, usize>,
    /// Rounded to one decimal.
    pub average_images_per_report: f64,
}

/// Document store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    reports: Mutex<Vec<StoredReport>>,
    snapshot: Option<PathBuf>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by `path`, loading it if it exists.
    pub async fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self, ServiceError> {
        let path = path.into();
        let reports = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<StoredReport>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        info!("Loaded {} report(s) from {}", reports.len(), path.display());
        Ok(Self {
            reports: Mutex::new(reports),
            snapshot: Some(path),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    async fn persist(&self, reports: &[StoredReport]) -> Result<(), ServiceError> {
        let Some(path) = self.snapshot.clone() else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(reports)?;
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| ServiceError::Database(format!("snapshot task failed: {e}")))??;
        debug!("Snapshot written ({} reports)", reports.len());
        Ok(())
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), ServiceError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| ServiceError::Io(e.error))?;
    Ok(())
}

/// Processed reports, newest first. Ties keep the later insertion first.
fn newest_first(reports: &[StoredReport]) -> Vec<&StoredReport> {
    let mut ordered: Vec<&StoredReport> = reports
        .iter()
        .rev()
        .filter(|r| r.status == ReportStatus::Processed)
        .collect();
    ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    ordered
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn create(&self, report: NewReport) -> Result<StoredReport, ServiceError> {
        let now = Utc::now();
        let stored = StoredReport {
            id: Uuid::new_v4(),
            report: report.report,
            files: report.files,
            processing_time_ms: report.processing_time_ms,
            status: ReportStatus::Processed,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut reports = self.reports.lock().await;
        reports.push(stored.clone());
        if let Err(e) = self.persist(&reports).await {
            reports.pop();
            return Err(e);
        }
        info!("Report stored: {}", stored.id);
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<StoredReport>, ServiceError> {
        let reports = self.reports.lock().await;
        Ok(reports.iter().find(|r| r.id == id).cloned())
    }

    async fn update(
        &self,
        id: Uuid,
        patch: ReportPatch,
    ) -> Result<Option<StoredReport>, ServiceError> {
        let mut reports = self.reports.lock().await;
        let Some(pos) = reports.iter().position(|r| r.id == id) else {
            return Ok(None);
        };

        let previous = reports[pos].clone();
        let now = Utc::now();
        let r = &mut reports[pos];
        if let Some(p) = patch.patient {
            r.report.patient = p;
        }
        if let Some(o) = patch.owner {
            r.report.owner = o;
        }
        if let Some(v) = patch.veterinarian {
            r.report.veterinarian = v;
        }
        if let Some(s) = patch.study {
            r.report.study = s;
        }
        if let Some(c) = patch.clinical {
            r.report.clinical = c;
        }
        if let Some(status) = patch.status {
            r.status = status;
            r.deleted_at = match status {
                ReportStatus::Deleted => r.deleted_at.or(Some(now)),
                ReportStatus::Processed => None,
            };
        }
        r.updated_at = now;
        let updated = r.clone();

        if let Err(e) = self.persist(&reports).await {
            reports[pos] = previous;
            return Err(e);
        }
        Ok(Some(updated))
    }

    async fn query(&self, query: &ReportQuery) -> Result<ReportPage, ServiceError> {
        let reports = self.reports.lock().await;
        let ordered = newest_first(&reports);

        let start = match query.start_after {
            Some(cursor) => ordered
                .iter()
                .position(|r| r.id == cursor)
                .map_or(0, |pos| pos + 1),
            None => query.page.saturating_sub(1).saturating_mul(query.limit),
        };

        let window: Vec<&StoredReport> = ordered.into_iter().skip(start).take(query.limit).collect();
        let has_more = window.len() == query.limit;

        let items: Vec<StoredReport> = window
            .into_iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();

        debug!(
            "Query returned {} report(s), has_more={}",
            items.len(),
            has_more
        );
        Ok(ReportPage {
            count: items.len(),
            has_more,
            last_id: items.last().map(|r| r.id),
            items,
        })
    }

    async fn delete(&self, id: Uuid) -> Result<bool, ServiceError> {
        let patch = ReportPatch {
            status: Some(ReportStatus::Deleted),
            ..Default::default()
        };
        let deleted = self.update(id, patch).await?.is_some();
        if deleted {
            info!("Report soft-deleted: {}", id);
        }
        Ok(deleted)
    }

    async fn statistics(&self) -> Result<ReportStatistics, ServiceError> {
        let reports = self.reports.lock().await;
        let processed: Vec<&StoredReport> = reports
            .iter()
            .filter(|r| r.status == ReportStatus::Processed)
            .collect();

        let mut species_distribution = BTreeMap::new();
        let mut reports_per_day = BTreeMap::new();
        let mut total_images = 0usize;

        for r in &processed {
            let species = r.report.patient.species.trim();
            let species = if species.is_empty() {
                UNKNOWN_SPECIES
            } else {
                species
            };
            *species_distribution.entry(species.to_string()).or_insert(0) += 1;
            *reports_per_day
                .entry(r.created_at.format("%Y-%m-%d").to_string())
                .or_insert(0) += 1;
            total_images += r.report.images.len();
        }

        let average_images_per_report = if processed.is_empty() {
            0.0
        } else {
            (total_images as f64 / processed.len() as f64 * 10.0).round() / 10.0
        };

        Ok(ReportStatistics {
            total_reports: processed.len(),
            species_distribution,
            reports_per_day,
            average_images_per_report,
        })
    }

    async fn health(&self) -> bool {
        match &self.snapshot {
            None => true,
            Some(path) => match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => tokio::fs::metadata(dir)
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false),
                _ => true,
            },
        }
    }
}
