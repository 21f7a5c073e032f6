use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    extract::multipart::MultipartError,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::AppState;
use crate::api::error::AppError;
use crate::services::intake::{IntakeSummary, RawCandidate};
use crate::services::progress::BatchSnapshot;

#[derive(Debug, Deserialize, IntoParams)]
pub struct IntakeParams {
    /// Client-chosen batch id, so progress can be polled while the request runs
    pub batch_id: Option<Uuid>,
}

fn read_error(err: MultipartError) -> AppError {
    let message = err.to_string();
    if message.contains("length limit exceeded") {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(message)
    }
}

#[utoipa::path(
    post,
    path = "/intake",
    request_body(content = Multipart, description = "Report files in multipart fields named \"file\""),
    params(IntakeParams),
    responses(
        (status = 200, description = "Batch processed, per-file outcomes inside", body = IntakeSummary),
        (status = 400, description = "Empty batch or too many files"),
        (status = 413, description = "Request body too large")
    ),
    tag = "intake"
)]
pub async fn intake_files(
    State(state): State<AppState>,
    Query(params): Query<IntakeParams>,
    mut multipart: Multipart,
) -> Result<Json<IntakeSummary>, AppError> {
    let mut candidates: Vec<RawCandidate> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(read_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name != "file" {
            continue;
        }

        let file_name = field.file_name().map(|value| value.to_string());
        let content = field.bytes().await.map_err(read_error)?;
        candidates.push(RawCandidate { file_name, content });
    }

    if candidates.is_empty() {
        return Err(AppError::BadRequest(
            "Please select one or more files first".to_string(),
        ));
    }
    if candidates.len() > state.config.max_batch_files {
        return Err(AppError::BadRequest(format!(
            "Too many files: a batch may contain at most {} file(s)",
            state.config.max_batch_files
        )));
    }

    let batch_id = params.batch_id.unwrap_or_else(Uuid::new_v4);

    // The batch keeps running even if the caller disconnects; progress
    // stays pollable until the sweeper evicts it.
    let intake = state.intake.clone();
    let worker = tokio::spawn(async move { intake.run_batch(batch_id, candidates).await });
    let summary = worker
        .await
        .map_err(|e| AppError::Internal(format!("intake worker failed: {}", e)))?;
    Ok(Json(summary))
}

#[utoipa::path(
    get,
    path = "/intake/{batch_id}/progress",
    params(
        ("batch_id" = Uuid, Path, description = "Batch to inspect")
    ),
    responses(
        (status = 200, description = "Current per-file progress", body = BatchSnapshot),
        (status = 404, description = "Unknown batch")
    ),
    tag = "intake"
)]
pub async fn batch_progress(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchSnapshot>, AppError> {
    state
        .progress
        .snapshot(batch_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Batch not found".to_string()))
}
