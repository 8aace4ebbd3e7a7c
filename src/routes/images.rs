use axum::{
    extract::State,
    Extension, Json,
};
use sea_orm::DatabaseConnection;
use serde::Serialize;

use crate::entities::image;
use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::routes::auth::UserResponse;
use crate::services::records;

#[derive(Serialize, utoipa::ToSchema)]
pub struct ImageResponse {
    pub id: i32,
    pub name: String,
    /// URL of the stored original.
    pub images: String,
    pub user: UserResponse,
    pub upload_date: chrono::NaiveDateTime,
    pub last_modified: chrono::NaiveDateTime,
}

impl ImageResponse {
    pub fn new(model: image::Model, owner: &AuthUser) -> Self {
        Self {
            id: model.id,
            name: model.name,
            images: format!("/media/{}", model.file),
            user: UserResponse::from(owner),
            upload_date: model.upload_date,
            last_modified: model.last_modified,
        }
    }
}

#[utoipa::path(
    get,
    path = "/images/",
    responses(
        (status = 200, description = "The caller's images, newest first", body = [ImageResponse]),
        (status = 401, description = "Not logged in")
    ),
    tag = "Detection"
)]
pub async fn list_images(
    State(db): State<DatabaseConnection>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<ImageResponse>>, AppError> {
    let images = records::list_images(&db, user.id).await?;
    Ok(Json(images.into_iter().map(|m| ImageResponse::new(m, &user)).collect()))
}
