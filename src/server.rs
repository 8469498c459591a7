//! HTTP API over a shared [`ReportProcessor`] (feature `server`).
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | GET | `/` | service info |
//! | GET | `/health` | collaborator health, 200 or 503 |
//! | POST | `/upload` | multipart field `report`, 201 on success |
//! | GET | `/reports` | paginated list |
//! | GET | `/reports/stats` | aggregates |
//! | GET | `/reports/:id` | one report, 410 once deleted |
//! | DELETE | `/reports/:id` | soft delete |
//!
//! Every response body is JSON with a `success` flag. Unknown routes get a
//! JSON 404.

use crate::config::MIB;
use crate::error::{ReportError, ServiceError, ValidationError};
use crate::pipeline::validate::{normalize_list_params, parse_report_id, ListParams};
use crate::process::{ReportProcessor, UploadedFile};
use crate::report::ReportStatus;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::get,
    routing::post,
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Multipart form field carrying the PDF.
pub const UPLOAD_FIELD: &str = "report";

/// Request body cap for uploads. Larger than the file limit so oversize
/// files still reach validation and get a specific message.
pub const UPLOAD_BODY_LIMIT: usize = 20 * MIB as usize;

const INTERNAL_ERROR: &str = "Error interno del servidor";
const INVALID_ID: &str = "ID de reporte inválido";
const NOT_FOUND: &str = "Reporte no encontrado";

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<ReportProcessor>,
}

impl AppState {
    pub fn new(processor: Arc<ReportProcessor>) -> Self {
        Self { processor }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let body_limit =
        UPLOAD_BODY_LIMIT.max(state.processor.config().max_file_size as usize + MIB as usize);
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/reports", get(list_reports))
        .route("/reports/stats", get(statistics))
        .route("/reports/:id", get(get_report).delete(delete_report))
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Errors ───────────────────────────────────────────────────────────────

/// A JSON error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "success": false, "error": error.into() }),
        }
    }

    fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR)
    }

    fn from_report_error(err: &ReportError, debug: bool) -> Self {
        if err.is_client_error() {
            return Self::new(StatusCode::BAD_REQUEST, err.public_message(debug));
        }
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: json!({
                "success": false,
                "error": INTERNAL_ERROR,
                "message": err.public_message(debug),
            }),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        error!("Document store error: {}", err);
        Self::internal()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

// ── Handlers ─────────────────────────────────────────────────────────────

async fn index() -> Json<Value> {
    Json(json!({
        "name": "vetscan",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Procesa reportes de ultrasonido veterinario en PDF",
        "endpoints": {
            "POST /upload": "Sube y procesa un reporte PDF",
            "GET /reports": "Lista todos los reportes",
            "GET /reports/:id": "Obtiene un reporte por ID",
            "GET /reports/stats": "Estadísticas de reportes",
            "DELETE /reports/:id": "Elimina un reporte",
            "GET /health": "Estado de los servicios",
        },
    }))
}

async fn health(State(state): State<AppState>) -> Response {
    let storage_ok = state.processor.object_store().exists().await;
    let database_ok = state.processor.report_store().health().await;
    let healthy = storage_ok && database_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let label = |ok: bool| if ok { "ok" } else { "error" };
    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "services": {
                "storage": label(storage_ok),
                "database": label(database_ok),
            },
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult {
    let debug = state.processor.config().debug_errors;
    let mut file: Option<UploadedFile> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Malformed multipart body: {}", e);
                return Err(ApiError::new(e.status(), e.body_text()));
            }
        };
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("report.pdf").to_string();
        let mime_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|e| {
            warn!("Failed to read upload: {}", e);
            ApiError::new(e.status(), e.body_text())
        })?;
        file = Some(UploadedFile {
            declared_size: Some(bytes.len() as u64),
            bytes: bytes.to_vec(),
            file_name,
            mime_type,
        });
        break;
    }

    let Some(file) = file else {
        let err = ReportError::from(ValidationError::MissingFile);
        return Err(ApiError::from_report_error(&err, debug));
    };

    let outcome = state
        .processor
        .process_upload(file)
        .await
        .map_err(|e| ApiError::from_report_error(&e, debug))?;

    let r = &outcome.report;
    info!("Upload stored as report {}", r.id);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Reporte procesado exitosamente",
            "data": {
                "id": r.id,
                "patient": r.report.patient,
                "owner": r.report.owner,
                "veterinarian": r.report.veterinarian,
                "clinical": r.report.clinical,
                "files": r.files,
                "imagesCount": r.report.images.len(),
                "processingTime": format!("{}ms", r.processing_time_ms),
                "createdAt": r.created_at,
            },
        })),
    )
        .into_response())
}

async fn list_reports(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult {
    let query = normalize_list_params(&params);
    let page = state.processor.report_store().query(&query).await?;
    Ok(Json(json!({
        "success": true,
        "data": page.items,
        "pagination": {
            "count": page.count,
            "hasMore": page.has_more,
            "lastId": page.last_id,
        },
    }))
    .into_response())
}

async fn statistics(State(state): State<AppState>) -> ApiResult {
    let stats = state.processor.report_store().statistics().await?;
    Ok(Json(json!({ "success": true, "data": stats })).into_response())
}

async fn get_report(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_report_id(&id)
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, INVALID_ID))?;
    let report = state
        .processor
        .report_store()
        .get(id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, NOT_FOUND))?;
    if report.status == ReportStatus::Deleted {
        return Err(ApiError::new(StatusCode::GONE, "Este reporte ha sido eliminado"));
    }
    Ok(Json(json!({ "success": true, "data": report })).into_response())
}

async fn delete_report(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_report_id(&id)
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, INVALID_ID))?;
    if !state.processor.report_store().delete(id).await? {
        return Err(ApiError::new(StatusCode::NOT_FOUND, NOT_FOUND));
    }
    Ok(Json(json!({
        "success": true,
        "message": "Reporte eliminado exitosamente",
    }))
    .into_response())
}

async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "Endpoint no encontrado",
            "path": uri.path(),
        })),
    )
        .into_response()
}
