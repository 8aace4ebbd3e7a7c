use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::utils::sanitize_filename;

pub const UPLOADS_DIR: &str = "whitefly_uploads";
pub const RESULTS_DIR: &str = "whitefly_results";

/// Originals and annotated images on local disk, both keyed by the stored filename.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    /// Safe to call from concurrent requests; existing directories are left alone.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.uploads_dir())?;
        std::fs::create_dir_all(self.results_dir())
    }

    /// Writes an original upload and returns the stored filename. A name that is already
    /// taken gets a random suffix instead of being overwritten.
    pub fn save_upload(&self, filename: &str, data: &[u8]) -> std::io::Result<String> {
        let base = sanitize_filename(filename);
        let mut candidate = base.clone();

        for _ in 0..16 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.uploads_dir().join(&candidate))
            {
                Ok(mut file) => {
                    file.write_all(data)?;
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    candidate = with_suffix(&base, &random_suffix());
                }
                Err(e) => return Err(e),
            }
        }

        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("could not find a free name for {}", base),
        ))
    }

    pub fn save_result(&self, stored_name: &str, data: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.results_dir().join(stored_name);
        std::fs::write(&path, data)?;
        Ok(path)
    }

    pub fn remove_result(&self, stored_name: &str) -> std::io::Result<()> {
        match std::fs::remove_file(self.results_dir().join(stored_name)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Maps a media path such as `whitefly_results/leaf.png` to the file on disk and the
    /// upload key of the image it belongs to. Paths outside the two media folders give `None`.
    pub fn resolve(&self, media_path: &str) -> Option<(PathBuf, String)> {
        let (dir, name) = media_path.split_once('/')?;
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return None;
        }

        match dir {
            UPLOADS_DIR => Some((self.uploads_dir().join(name), Self::upload_key(name))),
            RESULTS_DIR => Some((self.results_dir().join(name), Self::upload_key(name))),
            _ => None,
        }
    }

    /// Path stored on the image record, relative to the media root.
    pub fn upload_key(stored_name: &str) -> String {
        format!("{}/{}", UPLOADS_DIR, stored_name)
    }

    pub fn upload_url(stored_name: &str) -> String {
        format!("/media/{}/{}", UPLOADS_DIR, stored_name)
    }

    pub fn result_url(stored_name: &str) -> String {
        format!("/media/{}/{}", RESULTS_DIR, stored_name)
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(char::from)
        .collect()
}

fn with_suffix(name: &str, suffix: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, suffix, ext),
        _ => format!("{}_{}", name, suffix),
    }
}
