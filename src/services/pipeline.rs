//! Upload orchestration: per file persist, detect, annotate, then commit the batch.
//!
//! Originals and their image rows are written before the detector is called and survive a
//! failed batch. Everything derived from detection (result rows, log rows, annotated files)
//! is only committed once every file of the batch went through; a failure anywhere
//! discards it for the whole batch.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use sea_orm::{DatabaseConnection, DbErr, TransactionTrait};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::detection::Detection;
use crate::services::detector::{DetectionClient, DetectionError};
use crate::services::records;
use crate::services::result_log::{ResultLog, ResultLogError};
use crate::services::storage::MediaStorage;
use crate::utils::annotator::{self, AnnotateError};

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct ProcessedImage {
    pub image_id: i32,
    pub result_id: i32,
    pub image_name: String,
    pub whitefly_count: usize,
    pub annotated_image_url: String,
    pub original_image_url: String,
}

#[derive(Debug, Clone)]
pub struct UploadSummary {
    pub results: Vec<ProcessedImage>,
}

impl UploadSummary {
    pub fn message(&self) -> String {
        format!("Successfully processed {} image(s)", self.results.len())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Annotate(#[from] AnnotateError),
    #[error(transparent)]
    ResultLog(#[from] ResultLogError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Detection API failed for {filename}: {source}. Make sure the detection server is running on {service}")]
    DetectionUnavailable {
        filename: String,
        service: String,
        #[source]
        source: DetectionError,
    },
    #[error("Error processing {filename}: {source}")]
    Processing {
        filename: String,
        #[source]
        source: StepError,
    },
}

impl PipelineError {
    pub fn filename(&self) -> &str {
        match self {
            PipelineError::DetectionUnavailable { filename, .. } | PipelineError::Processing { filename, .. } => {
                filename
            }
        }
    }

    fn processing(filename: &str, source: impl Into<StepError>) -> Self {
        PipelineError::Processing { filename: filename.to_string(), source: source.into() }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::DetectionUnavailable { .. } => AppError::ServiceUnavailable(err.to_string()),
            PipelineError::Processing { .. } => AppError::Processing(err.to_string()),
        }
    }
}

/// Output of one file that made it through detection and annotation, not yet committed.
struct StagedFile {
    image_id: i32,
    image_name: String,
    stored_name: String,
    detections: Vec<Detection>,
}

pub struct UploadPipeline {
    db: DatabaseConnection,
    detector: DetectionClient,
    storage: MediaStorage,
    result_log: Arc<Mutex<ResultLog>>,
}

impl UploadPipeline {
    pub fn new(db: DatabaseConnection, detector: DetectionClient, storage: MediaStorage, result_log: ResultLog) -> Self {
        Self {
            db,
            detector,
            storage,
            result_log: Arc::new(Mutex::new(result_log)),
        }
    }

    pub fn detection_service(&self) -> String {
        self.detector.service_address()
    }

    /// Processes `batch` in submission order and stops at the first failing file.
    pub async fn process(&self, batch: Vec<UploadedFile>, owner_id: i32) -> Result<UploadSummary, PipelineError> {
        let mut staged = Vec::with_capacity(batch.len());

        for file in batch {
            match self.process_file(file, owner_id).await {
                Ok(done) => staged.push(done),
                Err(e) => {
                    warn!("Upload | batch aborted | file={} | {}", e.filename(), e);
                    self.discard(&staged).await;
                    return Err(e);
                }
            }
        }

        let results = match self.commit(&staged).await {
            Ok(results) => results,
            Err(e) => {
                self.discard(&staged).await;
                return Err(e);
            }
        };

        self.append_log_rows(&staged).await?;
        Ok(UploadSummary { results })
    }

    async fn process_file(&self, file: UploadedFile, owner_id: i32) -> Result<StagedFile, PipelineError> {
        let UploadedFile { filename, data } = file;

        let storage = self.storage.clone();
        let original = data.clone();
        let upload_name = filename.clone();
        let stored_name = tokio::task::spawn_blocking(move || {
            storage.ensure_dirs()?;
            storage.save_upload(&upload_name, &original)
        })
        .await
        .map_err(|e| PipelineError::processing(&filename, e))?
        .map_err(|e| PipelineError::processing(&filename, e))?;

        let image = records::create_image(&self.db, owner_id, &filename, &MediaStorage::upload_key(&stored_name))
            .await
            .map_err(|e| PipelineError::processing(&filename, e))?;

        let raw = self
            .detector
            .detect(&[(filename.clone(), data.clone())])
            .await
            .and_then(|lists| {
                lists
                    .into_iter()
                    .next()
                    .ok_or_else(|| DetectionError::InvalidResponse("empty response array".to_string()))
            })
            .map_err(|source| PipelineError::DetectionUnavailable {
                filename: filename.clone(),
                service: self.detector.service_address(),
                source,
            })?;

        let storage = self.storage.clone();
        let target = stored_name.clone();
        let detections = tokio::task::spawn_blocking(move || -> Result<Vec<Detection>, StepError> {
            let detections = annotator::parse_detections(&raw)?;
            let annotated = annotator::annotate(&data, &detections)?;
            storage.save_result(&target, &annotated)?;
            Ok(detections)
        })
        .await
        .map_err(|e| PipelineError::processing(&filename, e))?
        .map_err(|e| PipelineError::processing(&filename, e))?;

        info!(
            "Upload | processed | file={} | image_id={} | whiteflies={}",
            filename,
            image.id,
            detections.len()
        );

        Ok(StagedFile {
            image_id: image.id,
            image_name: filename,
            stored_name,
            detections,
        })
    }

    async fn commit(&self, staged: &[StagedFile]) -> Result<Vec<ProcessedImage>, PipelineError> {
        let Some(last) = staged.last() else {
            return Ok(Vec::new());
        };

        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| PipelineError::processing(&last.image_name, e))?;

        let mut results = Vec::with_capacity(staged.len());
        for file in staged {
            let coordinates = serde_json::to_value(&file.detections)
                .map_err(|e| PipelineError::processing(&file.image_name, e))?;
            let result = records::create_result(&txn, file.image_id, coordinates)
                .await
                .map_err(|e| PipelineError::processing(&file.image_name, e))?;

            results.push(ProcessedImage {
                image_id: file.image_id,
                result_id: result.id,
                image_name: file.image_name.clone(),
                whitefly_count: file.detections.len(),
                annotated_image_url: MediaStorage::result_url(&file.stored_name),
                original_image_url: MediaStorage::upload_url(&file.stored_name),
            });
        }

        txn.commit()
            .await
            .map_err(|e| PipelineError::processing(&last.image_name, e))?;

        Ok(results)
    }

    async fn append_log_rows(&self, staged: &[StagedFile]) -> Result<(), PipelineError> {
        let rows: Vec<(String, usize)> = staged
            .iter()
            .map(|file| (file.image_name.clone(), file.detections.len()))
            .collect();
        let result_log = Arc::clone(&self.result_log);

        let outcome = tokio::task::spawn_blocking(move || -> Result<(), (String, StepError)> {
            let log = result_log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            for (name, count) in &rows {
                log.log(name, *count).map_err(|e| (name.clone(), e.into()))?;
            }
            Ok(())
        })
        .await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err((filename, source))) => Err(PipelineError::Processing { filename, source }),
            Err(e) => Err(PipelineError::processing(
                staged.last().map(|f| f.image_name.as_str()).unwrap_or_default(),
                e,
            )),
        }
    }

    async fn discard(&self, staged: &[StagedFile]) {
        let storage = self.storage.clone();
        let names: Vec<String> = staged.iter().map(|f| f.stored_name.clone()).collect();

        let outcome = tokio::task::spawn_blocking(move || {
            for name in names {
                if let Err(e) = storage.remove_result(&name) {
                    warn!("Upload | could not remove annotated image {}: {}", name, e);
                }
            }
        })
        .await;

        if let Err(e) = outcome {
            warn!("Upload | cleanup task failed: {}", e);
        }
    }
}
