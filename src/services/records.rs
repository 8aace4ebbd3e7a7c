//! Owner-scoped persistence for uploaded images and their detection results.
//!
//! Anything a user does not own is reported as absent, never as forbidden.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::entities::{detection_result, image};

pub async fn create_image<C: ConnectionTrait>(
    db: &C,
    owner_id: i32,
    name: &str,
    file_key: &str,
) -> Result<image::Model, DbErr> {
    let now = chrono::Utc::now().naive_utc();
    image::ActiveModel {
        user_id: Set(owner_id),
        name: Set(name.to_string()),
        file: Set(file_key.to_string()),
        upload_date: Set(now),
        last_modified: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn create_result<C: ConnectionTrait>(
    db: &C,
    image_id: i32,
    annotated_coordinates: serde_json::Value,
) -> Result<detection_result::Model, DbErr> {
    let now = chrono::Utc::now().naive_utc();
    detection_result::ActiveModel {
        image_id: Set(image_id),
        annotated_coordinates: Set(annotated_coordinates),
        upload_date: Set(now),
        last_modified: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// Newest first.
pub async fn list_images<C: ConnectionTrait>(db: &C, owner_id: i32) -> Result<Vec<image::Model>, DbErr> {
    image::Entity::find()
        .filter(image::Column::UserId.eq(owner_id))
        .order_by_desc(image::Column::UploadDate)
        .order_by_desc(image::Column::Id)
        .all(db)
        .await
}

/// Newest first, each result paired with the image it annotates.
pub async fn list_results<C: ConnectionTrait>(
    db: &C,
    owner_id: i32,
) -> Result<Vec<(detection_result::Model, image::Model)>, DbErr> {
    let rows = detection_result::Entity::find()
        .find_also_related(image::Entity)
        .filter(image::Column::UserId.eq(owner_id))
        .order_by_desc(detection_result::Column::UploadDate)
        .order_by_desc(detection_result::Column::Id)
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(result, image)| image.map(|image| (result, image)))
        .collect())
}

/// The caller's image stored under `file_key` (e.g. `whitefly_uploads/leaf.png`).
pub async fn find_image_by_file<C: ConnectionTrait>(
    db: &C,
    file_key: &str,
    owner_id: i32,
) -> Result<Option<image::Model>, DbErr> {
    image::Entity::find()
        .filter(image::Column::File.eq(file_key))
        .filter(image::Column::UserId.eq(owner_id))
        .one(db)
        .await
}

pub async fn get_result<C: ConnectionTrait>(
    db: &C,
    result_id: i32,
    owner_id: i32,
) -> Result<Option<(detection_result::Model, image::Model)>, DbErr> {
    let row = detection_result::Entity::find_by_id(result_id)
        .find_also_related(image::Entity)
        .filter(image::Column::UserId.eq(owner_id))
        .one(db)
        .await?;

    Ok(row.and_then(|(result, image)| image.map(|image| (result, image))))
}

/// Replaces the stored coordinates of one result. Used by the admin CLI, which is not
/// scoped to an owner.
pub async fn update_annotations<C: ConnectionTrait>(
    db: &C,
    result: detection_result::Model,
    annotated_coordinates: serde_json::Value,
) -> Result<detection_result::Model, DbErr> {
    let mut active: detection_result::ActiveModel = result.into();
    active.annotated_coordinates = Set(annotated_coordinates);
    active.last_modified = Set(chrono::Utc::now().naive_utc());
    active.update(db).await
}
