//! Manual correction of stored detections (`edit-annotation` CLI).

use sea_orm::{ConnectionTrait, DbErr, EntityTrait};

use crate::entities::detection_result;
use crate::models::detection::{BoundingBox, Detection};
use crate::services::records;

#[derive(Debug, Clone, Copy, Default)]
pub struct BoxPatch {
    pub xmin: Option<i32>,
    pub ymin: Option<i32>,
    pub xmax: Option<i32>,
    pub ymax: Option<i32>,
}

impl BoxPatch {
    fn apply(&self, bbox: BoundingBox) -> BoundingBox {
        BoundingBox {
            xmin: self.xmin.unwrap_or(bbox.xmin),
            ymin: self.ymin.unwrap_or(bbox.ymin),
            xmax: self.xmax.unwrap_or(bbox.xmax),
            ymax: self.ymax.unwrap_or(bbox.ymax),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EditAnnotationError {
    #[error("Result with ID {0} does not exist")]
    ResultNotFound(i32),
    #[error("Annotation with ID {annotation_id} not found in Result ID {result_id}")]
    AnnotationNotFound { result_id: i32, annotation_id: u32 },
    #[error("stored coordinates of Result ID {result_id} are unreadable: {source}")]
    Unreadable {
        result_id: i32,
        #[source]
        source: serde_json::Error,
    },
    #[error("edited box ({}, {}) -> ({}, {}) is empty or inverted", .0.xmin, .0.ymin, .0.xmax, .0.ymax)]
    InvalidBox(BoundingBox),
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// Patches the entry tagged `annotation_id` in place and returns (before, after).
pub fn apply_patch(
    detections: &mut [Detection],
    annotation_id: u32,
    patch: BoxPatch,
) -> Option<Result<(Detection, Detection), BoundingBox>> {
    let entry = detections.iter_mut().find(|d| d.index == annotation_id)?;
    let before = *entry;
    let bbox = patch.apply(entry.bbox);
    if !bbox.is_well_formed() {
        return Some(Err(bbox));
    }
    entry.bbox = bbox;
    Some(Ok((before, *entry)))
}

pub async fn edit_annotation<C: ConnectionTrait>(
    db: &C,
    result_id: i32,
    annotation_id: u32,
    patch: BoxPatch,
) -> Result<(Detection, Detection), EditAnnotationError> {
    let result = detection_result::Entity::find_by_id(result_id)
        .one(db)
        .await?
        .ok_or(EditAnnotationError::ResultNotFound(result_id))?;

    let mut detections: Vec<Detection> = serde_json::from_value(result.annotated_coordinates.clone())
        .map_err(|source| EditAnnotationError::Unreadable { result_id, source })?;

    let (before, after) = apply_patch(&mut detections, annotation_id, patch)
        .ok_or(EditAnnotationError::AnnotationNotFound { result_id, annotation_id })?
        .map_err(EditAnnotationError::InvalidBox)?;

    let coordinates = serde_json::to_value(&detections)
        .map_err(|source| EditAnnotationError::Unreadable { result_id, source })?;
    records::update_annotations(db, result, coordinates).await?;

    Ok((before, after))
}
