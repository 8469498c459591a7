//! Request validation: upload checks and query normalisation.
//!
//! ## Why check the header here?
//!
//! The declared MIME type is whatever the client says it is. Checking the
//! `%PDF-` signature before anything is stored means a renamed JPEG is
//! rejected with a specific 4xx message instead of surfacing later as an
//! empty scan and a confused extraction engine.

use crate::error::ValidationError;
use crate::services::report_store::ReportQuery;
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// The only MIME type accepted for uploads.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Leading bytes of every PDF file.
pub const PDF_SIGNATURE: &[u8] = b"%PDF-";

/// Longest free-text search value kept, in characters.
pub const MAX_SEARCH_CHARS: usize = 1000;

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .unwrap()
});

/// Outcome of the file-validator contract: `{valid, error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<(), ValidationError>> for FileValidation {
    fn from(r: Result<(), ValidationError>) -> Self {
        match r {
            Ok(()) => Self {
                valid: true,
                error: None,
            },
            Err(e) => Self {
                valid: false,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Check an uploaded file against the PDF rules, in order: MIME type,
/// declared size, non-empty buffer, `%PDF-` signature.
pub fn validate_pdf(
    bytes: &[u8],
    mime_type: &str,
    declared_size: u64,
    max_file_size: u64,
) -> Result<(), ValidationError> {
    if mime_type != PDF_MIME_TYPE {
        return Err(ValidationError::UnsupportedMimeType {
            mime: mime_type.to_string(),
        });
    }
    if declared_size > max_file_size {
        return Err(ValidationError::TooLarge {
            size: declared_size,
            max_mib: max_file_size / (1024 * 1024),
        });
    }
    if bytes.is_empty() {
        return Err(ValidationError::Empty);
    }
    if !bytes.starts_with(PDF_SIGNATURE) {
        return Err(ValidationError::NotAPdf);
    }
    debug!("Upload validated: {} bytes", bytes.len());
    Ok(())
}

pub fn is_valid_uuid(s: &str) -> bool {
    UUID_RE.is_match(s)
}

/// Parse an id, accepting any hyphenated 8-4-4-4-12 hex string.
pub fn parse_report_id(s: &str) -> Option<Uuid> {
    if is_valid_uuid(s) {
        Uuid::parse_str(s).ok()
    } else {
        None
    }
}

/// Trim, strip `<`, `>` and `\`, and cap at [`MAX_SEARCH_CHARS`] characters.
pub fn sanitize_string(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '\\'))
        .take(MAX_SEARCH_CHARS)
        .collect()
}

/// Raw list-endpoint query parameters, as received.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub limit: Option<String>,
    pub page: Option<String>,
    pub start_after: Option<String>,
    pub patient_name: Option<String>,
    pub owner_name: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

/// Normalise raw list parameters. Invalid values fall back to defaults
/// rather than failing the request.
pub fn normalize_list_params(params: &ListParams) -> ReportQuery {
    let limit = params
        .limit
        .as_deref()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map_or(DEFAULT_PAGE_LIMIT, |n| n.clamp(1, MAX_PAGE_LIMIT as i64) as usize);

    let page = params
        .page
        .as_deref()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map_or(1, |n| n.max(1) as usize);

    ReportQuery {
        limit,
        page,
        start_after: params.start_after.as_deref().and_then(parse_report_id),
        patient_name: non_empty(params.patient_name.as_deref()),
        owner_name: non_empty(params.owner_name.as_deref()),
        date_from: params.date_from.as_deref().and_then(|d| parse_date(d, false)),
        date_to: params.date_to.as_deref().and_then(|d| parse_date(d, true)),
    }
}

fn non_empty(v: Option<&str>) -> Option<String> {
    v.map(sanitize_string).filter(|s| !s.is_empty())
}

/// Accept RFC 3339 timestamps or plain `YYYY-MM-DD` dates.
///
/// A plain date is the start of that day, or its last second when
/// `end_of_day` is set, so date-only ranges are inclusive.
pub fn parse_date(s: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)?
    } else {
        date.and_hms_opt(0, 0, 0)?
    };
    Some(time.and_utc())
}
