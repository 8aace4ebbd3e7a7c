use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub media_root: PathBuf,
    pub results_csv: PathBuf,
    pub detection_batch_url: String,
    pub detection_single_url: String,
    pub detection_timeout: Duration,
    pub session_ttl: chrono::Duration,
    pub max_upload_bytes: usize,
    /// Browser origins allowed to call the API with credentials; empty disables CORS.
    pub cors_allowed_origins: Vec<String>,
    pub log_level: String,
}

pub const DEFAULT_DETECTION_BATCH_URL: &str = "http://localhost:5000/multi_file_async/";
pub const DEFAULT_DETECTION_SINGLE_URL: &str = "http://localhost:5000/post_single_file/";

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;
        let media_root = PathBuf::from(env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".to_string()));
        let results_csv = env::var("RESULTS_CSV")
            .map(PathBuf::from)
            .unwrap_or_else(|_| media_root.join("csv").join("results.csv"));

        Ok(Self {
            database_url,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            media_root,
            results_csv,
            detection_batch_url: env::var("DETECTION_BATCH_URL")
                .unwrap_or_else(|_| DEFAULT_DETECTION_BATCH_URL.to_string()),
            detection_single_url: env::var("DETECTION_SINGLE_URL")
                .unwrap_or_else(|_| DEFAULT_DETECTION_SINGLE_URL.to_string()),
            detection_timeout: Duration::from_secs(parse_var("DETECTION_TIMEOUT_SECS", 60)?),
            session_ttl: chrono::Duration::hours(parse_var("SESSION_TTL_HOURS", 24 * 14)?),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", 50 * 1024 * 1024)?,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Defaults for everything but the database, used by tests and the CLI tools.
    pub fn with_database(database_url: impl Into<String>, media_root: impl Into<PathBuf>) -> Self {
        let media_root = media_root.into();
        Self {
            database_url: database_url.into(),
            bind_addr: "127.0.0.1:3000".to_string(),
            results_csv: media_root.join("csv").join("results.csv"),
            media_root,
            detection_batch_url: DEFAULT_DETECTION_BATCH_URL.to_string(),
            detection_single_url: DEFAULT_DETECTION_SINGLE_URL.to_string(),
            detection_timeout: Duration::from_secs(60),
            session_ttl: chrono::Duration::hours(24 * 14),
            max_upload_bytes: 50 * 1024 * 1024,
            cors_allowed_origins: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_database_defaults() {
        let config = Config::with_database("sqlite::memory:", "/tmp/media");
        assert_eq!(config.results_csv, PathBuf::from("/tmp/media/csv/results.csv"));
        assert_eq!(config.detection_batch_url, DEFAULT_DETECTION_BATCH_URL);
        assert_eq!(config.detection_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_var_falls_back_to_default() {
        let value: u64 = parse_var("WHITEFLY_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }
}
