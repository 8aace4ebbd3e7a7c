use std::sync::Arc;

use axum::extract::FromRef;
use sea_orm::DatabaseConnection;

use crate::config::Config;
use crate::services::detector::{DetectionClient, DetectionError, DetectorConfig};
use crate::services::pipeline::UploadPipeline;
use crate::services::result_log::ResultLog;
use crate::services::storage::MediaStorage;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<Config>,
    pub pipeline: Arc<UploadPipeline>,
}

impl AppState {
    pub fn new(db: DatabaseConnection, config: Config) -> Result<Self, DetectionError> {
        let detector = DetectionClient::new(DetectorConfig::from(&config))?;
        let pipeline = UploadPipeline::new(
            db.clone(),
            detector,
            MediaStorage::new(&config.media_root),
            ResultLog::new(&config.results_csv),
        );

        Ok(Self {
            db,
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
        })
    }
}

impl FromRef<AppState> for DatabaseConnection {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}
