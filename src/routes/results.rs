use axum::{
    extract::{Path, State},
    Extension, Json,
};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::Value;

use crate::entities::{detection_result, image};
use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::routes::images::ImageResponse;
use crate::services::records;

#[derive(Serialize, utoipa::ToSchema)]
pub struct ResultResponse {
    pub id: i32,
    pub image: ImageResponse,
    #[schema(value_type = Object)]
    pub annotated_coordinates: Value,
    pub whitefly_count: usize,
    pub upload_date: chrono::NaiveDateTime,
    pub last_modified: chrono::NaiveDateTime,
}

impl ResultResponse {
    fn new(result: detection_result::Model, image: image::Model, owner: &AuthUser) -> Self {
        let whitefly_count = result.annotated_coordinates.as_array().map_or(0, Vec::len);
        Self {
            id: result.id,
            image: ImageResponse::new(image, owner),
            annotated_coordinates: result.annotated_coordinates,
            whitefly_count,
            upload_date: result.upload_date,
            last_modified: result.last_modified,
        }
    }
}

#[utoipa::path(
    get,
    path = "/results/",
    responses(
        (status = 200, description = "The caller's detection results, newest first", body = [ResultResponse]),
        (status = 401, description = "Not logged in")
    ),
    tag = "Detection"
)]
pub async fn list_results(
    State(db): State<DatabaseConnection>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<ResultResponse>>, AppError> {
    let rows = records::list_results(&db, user.id).await?;
    Ok(Json(
        rows.into_iter()
            .map(|(result, image)| ResultResponse::new(result, image, &user))
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/results/{id}/",
    params(
        ("id" = i32, Path, description = "Result ID")
    ),
    responses(
        (status = 200, description = "Result details", body = ResultResponse),
        (status = 404, description = "No such result for this user")
    ),
    tag = "Detection"
)]
pub async fn get_result(
    State(db): State<DatabaseConnection>,
    Extension(user): Extension<AuthUser>,
    Path(result_id): Path<i32>,
) -> Result<Json<ResultResponse>, AppError> {
    let (result, image) = records::get_result(&db, result_id, user.id)
        .await?
        .ok_or(AppError::NotFound("Result not found".to_string()))?;

    Ok(Json(ResultResponse::new(result, image, &user)))
}
