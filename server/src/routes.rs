use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use chapterflow::{
    ArchiveSummary, CancelReceipt, JobKind, JobReceipt, JobStatusView, JobSummary,
    PipelineRunner, SubmitRequest,
};

use crate::auth::Caller;
use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub runner: PipelineRunner,
}

pub fn router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/translate", post(submit_translation))
        .route("/chapters/:chapter_id/pages", post(submit_chapter_upload))
        .route("/jobs/:job_id", get(job_status).delete(cancel_job))
        .route("/jobs/:job_id/record", delete(delete_job))
        .route("/jobs/:job_id/download", get(download_job))
        .route("/archives/analyze", post(analyze_archive))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Fields of an upload form. Only `file` is required.
#[derive(Default)]
struct UploadForm {
    filename: Option<String>,
    bytes: Option<Vec<u8>>,
    title: Option<String>,
    chapter_number: Option<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?
        {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "file" => {
                    form.filename = Some(field.file_name().unwrap_or("upload").to_string());
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                    form.bytes = Some(bytes.to_vec());
                }
                "title" => form.title = Some(text(field).await?),
                "chapter_number" => form.chapter_number = Some(text(field).await?),
                _ => {}
            }
        }
        Ok(form)
    }

    fn file(&mut self) -> Result<(String, Vec<u8>), ApiError> {
        match (self.filename.take(), self.bytes.take()) {
            (Some(filename), Some(bytes)) => Ok((filename, bytes)),
            _ => Err(ApiError::BadRequest("missing 'file' field".to_string())),
        }
    }
}

async fn text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map(|s| s.trim().to_string())
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

async fn submit_translation(
    State(state): State<AppState>,
    Caller(principal): Caller,
    multipart: Multipart,
) -> Result<(StatusCode, Json<JobReceipt>), ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let (filename, bytes) = form.file()?;

    let receipt = state
        .runner
        .submit(
            &principal,
            SubmitRequest {
                filename,
                bytes,
                kind: JobKind::Translate,
            },
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

async fn submit_chapter_upload(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(chapter_id): Path<i64>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<JobReceipt>), ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let (filename, bytes) = form.file()?;

    let chapter_number = match form.chapter_number.as_deref() {
        None | Some("") => 1,
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ApiError::BadRequest(format!("invalid chapter_number '{}'", raw)))?,
    };
    let title = form
        .title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("chapter-{}", chapter_id));

    let receipt = state
        .runner
        .submit(
            &principal,
            SubmitRequest {
                filename,
                bytes,
                kind: JobKind::ChapterUpload {
                    chapter_id,
                    title,
                    chapter_number,
                },
            },
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

async fn job_status(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    Ok(Json(state.runner.status(&principal, &job_id)?))
}

async fn list_jobs(
    State(state): State<AppState>,
    Caller(principal): Caller,
) -> Result<Json<Vec<JobSummary>>, ApiError> {
    Ok(Json(state.runner.list_jobs(&principal)?))
}

async fn delete_job(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(job_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.runner.delete(&principal, &job_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_job(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(job_id): Path<String>,
) -> Result<Json<CancelReceipt>, ApiError> {
    Ok(Json(state.runner.cancel(&principal, &job_id)?))
}

async fn download_job(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let archive = state.runner.download(&principal, &job_id)?;
    let disposition = format!("attachment; filename=\"{}\"", archive.filename);
    Ok((
        [
            (header::CONTENT_TYPE, archive.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        archive.bytes,
    )
        .into_response())
}

async fn analyze_archive(
    State(state): State<AppState>,
    Caller(_principal): Caller,
    multipart: Multipart,
) -> Result<Json<ArchiveSummary>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let (filename, bytes) = form.file()?;
    Ok(Json(state.runner.analyze(&filename, &bytes)?))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "active_jobs": state.runner.active_jobs(),
    }))
}
