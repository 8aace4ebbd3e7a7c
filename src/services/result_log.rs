use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

pub const HEADER: [&str; 3] = ["Date", "Image Name", "Whitefly Count"];
pub const DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum ResultLogError {
    #[error("result log io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("result log write error: {0}")]
    Csv(#[from] csv::Error),
}

/// Append-only CSV of processed images.
///
/// Appends are not atomic: callers sharing one log must serialize `log` calls
/// (the upload pipeline keeps it behind a mutex).
#[derive(Debug)]
pub struct ResultLog {
    path: PathBuf,
}

impl ResultLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, image_name: &str, detection_count: usize) -> Result<(), ResultLogError> {
        let timestamp = chrono::Local::now().format(DATE_FORMAT).to_string();
        self.log_at(&timestamp, image_name, detection_count)
    }

    fn log_at(&self, timestamp: &str, image_name: &str, detection_count: usize) -> Result<(), ResultLogError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let is_new = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .from_writer(file);
        if is_new {
            writer.write_record(HEADER)?;
        }
        let count = detection_count.to_string();
        writer.write_record([timestamp, image_name, count.as_str()])?;
        writer.flush()?;

        Ok(())
    }
}
