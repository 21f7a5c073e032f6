use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};

use crate::AppState;
use crate::api::error::AppError;
use crate::services::reports::{BulkDeleteRequest, BulkDeleteResponse, ReportEntry};

#[utoipa::path(
    get,
    path = "/reports",
    responses(
        (status = 200, description = "Stored reports, newest first", body = Vec<ReportEntry>),
        (status = 502, description = "Storage unreachable")
    ),
    tag = "reports"
)]
pub async fn list_reports(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReportEntry>>, AppError> {
    let entries = state
        .reports
        .list_reports()
        .await
        .map_err(|e| AppError::Storage(format!("Failed to list reports: {}", e)))?;
    Ok(Json(entries))
}

#[utoipa::path(
    post,
    path = "/reports/bulk-delete",
    request_body = BulkDeleteRequest,
    responses(
        (status = 200, description = "Per-key outcomes", body = BulkDeleteResponse),
        (status = 400, description = "Bad request")
    ),
    tag = "reports"
)]
pub async fn bulk_delete(
    State(state): State<AppState>,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<Json<BulkDeleteResponse>, AppError> {
    if req.keys.is_empty() {
        return Err(AppError::BadRequest("No report keys provided".to_string()));
    }

    Ok(Json(state.reports.bulk_delete(&req.keys).await))
}

#[utoipa::path(
    get,
    path = "/reports/{key}",
    params(
        ("key" = String, Path, description = "Full object key of the report")
    ),
    responses(
        (status = 200, description = "Report content", content_type = "application/octet-stream"),
        (status = 404, description = "Unknown report"),
        (status = 502, description = "Storage unreachable")
    ),
    tag = "reports"
)]
pub async fn download_report(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let content = state
        .reports
        .download(&key)
        .await
        .map_err(|e| AppError::Storage(format!("Failed to fetch report: {}", e)))?
        .ok_or_else(|| AppError::NotFound("Report not found".to_string()))?;

    let file_name = key.rsplit('/').next().unwrap_or(key.as_str()).to_string();
    let headers = [
        (
            header::CONTENT_TYPE,
            "application/octet-stream".to_string(),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        ),
    ];

    Ok((headers, content))
}
