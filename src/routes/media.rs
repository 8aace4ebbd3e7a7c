use axum::{
    body::Body,
    extract::{Path, Request, State},
    response::Response,
    Extension,
};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::services::records;
use crate::services::storage::MediaStorage;
use crate::state::AppState;

/// Serves an original or annotated image, but only to the user who uploaded it.
#[utoipa::path(
    get,
    path = "/media/{path}",
    params(("path" = String, Path, description = "`whitefly_uploads/<name>` or `whitefly_results/<name>`")),
    responses(
        (status = 200, description = "Image bytes"),
        (status = 401, description = "Not logged in"),
        (status = 404, description = "No such image for this user")
    ),
    tag = "Detection"
)]
pub async fn serve_media(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(path): Path<String>,
    request: Request,
) -> Result<Response, AppError> {
    let not_found = || AppError::NotFound("File not found".to_string());

    let storage = MediaStorage::new(&state.config.media_root);
    let (file, upload_key) = storage.resolve(&path).ok_or_else(not_found)?;

    records::find_image_by_file(&state.db, &upload_key, user.id)
        .await?
        .ok_or_else(not_found)?;

    let response = match ServeFile::new(file).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    Ok(response.map(Body::new))
}
