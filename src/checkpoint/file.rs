//! File-backed checkpoint store
//!
//! One JSON file per job under a directory. Writes go through a temp file in
//! the same directory followed by an atomic rename, under an exclusive
//! `fd-lock` on a sibling `.lock` file; reads take the shared lock.

use super::{last_updated_now, Checkpoint, CheckpointError, CheckpointStore};
use async_trait::async_trait;
use fd_lock::RwLock;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Maximum accepted checkpoint file size (1 MB)
pub const MAX_CHECKPOINT_FILE_SIZE: u64 = 1024 * 1024;

/// Checkpoint store writing `<dir>/<job_id>.json`
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `dir`. The directory is created lazily.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the checkpoint file for a job
    pub fn path_for(&self, job_id: &str) -> PathBuf {
        let safe: String = job_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    fn open_lock_file(path: &Path) -> Result<File, CheckpointError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::IoError(e.to_string()))?;
        }
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path.with_extension("lock"))
            .map_err(|e| CheckpointError::LockError(format!("Failed to open lock file: {e}")))
    }

    fn write_atomic(path: &Path, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut doc = checkpoint.to_document();
        doc.insert("last_updated".to_string(), Value::String(last_updated_now()));
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| CheckpointError::SerializationError(e.to_string()))?;

        let mut lock = RwLock::new(Self::open_lock_file(path)?);
        let _guard = lock
            .write()
            .map_err(|e| CheckpointError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| CheckpointError::IoError(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| CheckpointError::IoError(format!("Failed to write temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| CheckpointError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| CheckpointError::IoError(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| CheckpointError::IoError(format!("Failed to persist temp file: {e}")))?;

        // Make the rename itself durable
        if let Ok(dir) = File::open(parent_dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn read_locked(path: &Path, job_id: &str) -> Result<Checkpoint, CheckpointError> {
        let lock = RwLock::new(Self::open_lock_file(path)?);
        let _guard = lock
            .read()
            .map_err(|e| CheckpointError::LockError(format!("Failed to acquire read lock: {e}")))?;

        let metadata =
            std::fs::metadata(path).map_err(|e| CheckpointError::IoError(e.to_string()))?;
        if metadata.len() > MAX_CHECKPOINT_FILE_SIZE {
            return Err(CheckpointError::StateTooLarge {
                size: metadata.len(),
                max: MAX_CHECKPOINT_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| CheckpointError::IoError(e.to_string()))?;
        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(doc)) => Ok(Checkpoint::from_document(job_id, &doc)),
            Ok(_) => Err(CheckpointError::DeserializationError(
                "checkpoint file is not a JSON object".to_string(),
            )),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Failed to parse checkpoint file");
                Err(CheckpointError::DeserializationError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, job_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(job_id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_locked(&path, job_id).map(Some)
    }

    async fn load(&self, job_id: &str) -> Result<Checkpoint, CheckpointError> {
        let path = self.path_for(job_id);
        match self.get(job_id).await? {
            Some(checkpoint) => {
                debug!(path = %path.display(), batch_no = checkpoint.batch_number, "Checkpoint loaded");
                Ok(checkpoint)
            }
            None => {
                debug!(path = %path.display(), "No checkpoint file, creating defaults");
                let checkpoint = Checkpoint::new(job_id);
                Self::write_atomic(&path, &checkpoint)?;
                Ok(checkpoint)
            }
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(&checkpoint.job_id);
        Self::write_atomic(&path, checkpoint)?;
        debug!(path = %path.display(), batch_no = checkpoint.batch_number, "Checkpoint saved");
        Ok(())
    }

    async fn delete(&self, job_id: &str) -> Result<bool, CheckpointError> {
        let path = self.path_for(job_id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path).map_err(|e| CheckpointError::IoError(e.to_string()))?;
        let _ = std::fs::remove_file(path.with_extension("lock"));
        info!(path = %path.display(), "Checkpoint file removed");
        Ok(true)
    }
}
