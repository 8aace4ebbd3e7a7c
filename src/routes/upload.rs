use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::Json,
    Extension,
};
use serde::Serialize;
use tracing::info;

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::services::pipeline::{ProcessedImage, UploadedFile};
use crate::state::AppState;

#[derive(Serialize, utoipa::ToSchema)]
pub struct UploadResponse {
    message: String,
    results: Vec<ProcessedImage>,
}

// Browsers may send a full client-side path as the filename.
fn basename(filename: &str) -> String {
    filename.rsplit(['/', '\\']).next().unwrap_or(filename).to_string()
}

fn multipart_error(err: MultipartError, fallback: String) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Upload exceeds the maximum request size".to_string())
    } else {
        AppError::BadRequest(fallback)
    }
}

/// Collects every file sent under `images`; each file is read into memory exactly once.
/// Text fields and empty file selections under that name are ignored.
async fn read_images(mut multipart: Multipart) -> Result<Vec<UploadedFile>, AppError> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, "Invalid multipart data".to_string()))?
    {
        if field.name() != Some("images") {
            continue;
        }

        let filename = match field.file_name().map(basename) {
            Some(name) if !name.is_empty() => name,
            _ => continue,
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, format!("Failed to read {}", filename)))?;
        files.push(UploadedFile { filename, data });
    }

    Ok(files)
}

#[utoipa::path(
    post,
    path = "/upload/",
    tag = "Detection",
    request_body(content = Vec<u8>, content_type = "multipart/form-data", description = "One or more files under the `images` field"),
    responses(
        (status = 200, description = "Every image was processed", body = UploadResponse),
        (status = 400, description = "No images provided"),
        (status = 401, description = "Not logged in"),
        (status = 413, description = "Request larger than the configured upload limit"),
        (status = 500, description = "Processing failed; the message names the file"),
        (status = 503, description = "Detection service unavailable")
    )
)]
pub async fn upload_images(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let multipart = multipart.map_err(|_| AppError::BadRequest("No images provided".to_string()))?;
    let files = read_images(multipart).await?;

    if files.is_empty() {
        info!("Upload | POST /upload/ | user={} | res=400 | No images provided", user.username);
        return Err(AppError::BadRequest("No images provided".to_string()));
    }

    let count = files.len();
    let summary = state.pipeline.process(files, user.id).await.map_err(|e| {
        info!("Upload | POST /upload/ | user={} | files={} | failed={}", user.username, count, e.filename());
        AppError::from(e)
    })?;

    info!("Upload | POST /upload/ | user={} | files={} | res=200", user.username, count);
    Ok(Json(UploadResponse {
        message: summary.message(),
        results: summary.results,
    }))
}
