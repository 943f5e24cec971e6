use std::path::Path as FsPath;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cache::{CacheStats, WarmCacheReport};
use crate::errors::AppError;
use crate::extraction::file_info::get_file_info;
use crate::jobs::models::{JobPriority, JobStatus, JobSubmission, ProcessingJob};
use crate::jobs::processor::QueueStats;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub upload_id: Uuid,
    pub status: JobStatus,
}

struct UploadForm {
    user_id: String,
    filename: String,
    data: Bytes,
    priority: JobPriority,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut user_id = None;
    let mut file = None;
    let mut priority = JobPriority::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "user_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read user_id: {e}")))?;
                user_id = Some(text.trim().to_string()).filter(|s| !s.is_empty());
            }
            "priority" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read priority: {e}")))?;
                priority = JobPriority::parse(&text)
                    .ok_or_else(|| AppError::Validation(format!("Unknown priority '{text}'")))?;
            }
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read file: {e}")))?;
                file = Some((filename, data));
            }
            other => tracing::debug!("Ignoring multipart field '{other}'"),
        }
    }

    let user_id = user_id.ok_or_else(|| AppError::Validation("user_id is required".into()))?;
    let (filename, data) = file.ok_or_else(|| AppError::Validation("file is required".into()))?;
    Ok(UploadForm {
        user_id,
        filename,
        data,
        priority,
    })
}

/// Keeps only a short alphanumeric extension from the client's filename.
fn stored_name(upload_id: Uuid, filename: &str) -> String {
    let ext = FsPath::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!("{upload_id}.{}", ext.to_ascii_lowercase()),
        None => upload_id.to_string(),
    }
}

/// POST /api/v1/uploads
pub async fn handle_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let form = read_upload_form(multipart).await?;
    let max_bytes = state.config.max_upload_bytes;

    if form.data.len() as u64 > max_bytes {
        return Err(AppError::Validation(format!(
            "File exceeds the {max_bytes} byte upload limit"
        )));
    }

    let upload_id = Uuid::new_v4();
    tokio::fs::create_dir_all(&state.config.upload_dir)
        .await
        .context("Failed to create upload directory")?;
    let path = state
        .config
        .upload_dir
        .join(stored_name(upload_id, &form.filename));
    tokio::fs::write(&path, &form.data)
        .await
        .with_context(|| format!("Failed to store upload at {}", path.display()))?;

    let info = get_file_info(&path, &form.filename, max_bytes);
    if !info.is_valid {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("Failed to remove rejected upload {}: {e}", path.display());
        }
        return Err(AppError::Validation(format!(
            "Unsupported or empty file '{}' ({}, {} bytes)",
            form.filename, info.file_type, info.file_size
        )));
    }

    let submission = JobSubmission::new(
        form.user_id,
        upload_id,
        path,
        form.filename,
        info.file_type,
    )
    .with_priority(form.priority);
    let job_id = state.processor.submit_job(submission);

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            job_id,
            upload_id,
            status: JobStatus::Queued,
        }),
    ))
}

/// GET /api/v1/jobs/:job_id
pub async fn handle_get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ProcessingJob>, AppError> {
    state
        .processor
        .get_job_status(job_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))
}

/// DELETE /api/v1/jobs/:job_id
pub async fn handle_cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ProcessingJob>, AppError> {
    let job = state
        .processor
        .get_job_status(job_id)
        .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))?;

    if job.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "Job {job_id} already finished with status {:?}",
            job.status
        )));
    }
    if !state.processor.cancel_job(job_id) {
        return Err(AppError::Conflict(format!(
            "Job {job_id} is already being processed and can no longer be cancelled"
        )));
    }

    state
        .processor
        .get_job_status(job_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))
}

/// GET /api/v1/queue/stats
pub async fn handle_queue_stats(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.processor.get_queue_stats())
}

/// GET /api/v1/cache/stats
pub async fn handle_cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.get_cache_stats())
}

#[derive(Debug, Deserialize)]
pub struct WarmCacheRequest {
    /// Names of files already stored in the upload directory.
    pub files: Vec<String>,
    pub mime_types: Vec<String>,
}

/// POST /api/v1/cache/warm
pub async fn handle_warm_cache(
    State(state): State<AppState>,
    Json(req): Json<WarmCacheRequest>,
) -> Result<Json<WarmCacheReport>, AppError> {
    let mut paths = Vec::with_capacity(req.files.len());
    for name in &req.files {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(AppError::Validation(format!("Invalid upload file name '{name}'")));
        }
        paths.push(state.config.upload_dir.join(name));
    }

    let timeout = Duration::from_secs(state.config.job_timeout_seconds);
    let report = state
        .cache
        .warm_cache(&paths, &req.mime_types, &state.extraction, timeout)
        .await?;
    Ok(Json(report))
}

/// DELETE /api/v1/cache
pub async fn handle_clear_cache(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.cache.clear_cache().await;
    Json(json!({ "cleared": cleared }))
}
