use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{CheckpointError, ProgressRecord, SCHEMA_VERSION};

/// Directory of progress records, one JSON file per fingerprint.
///
/// Reads never fail: a missing, unreadable or corrupt record is reported as
/// absent so the caller starts the upload from scratch.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Opens (and creates, if needed) the checkpoint directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Directory holding the records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record named `record_key`.
    pub fn path_for(&self, record_key: &str) -> PathBuf {
        self.dir.join(record_key)
    }

    /// Loads a record. Returns `None` when it is missing or unusable.
    pub async fn load(&self, record_key: &str) -> Option<ProgressRecord> {
        let path = self.path_for(record_key);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read checkpoint, starting over");
                return None;
            }
        };

        let record: ProgressRecord = match serde_json::from_slice(&data) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt checkpoint, starting over");
                return None;
            }
        };

        if record.version != SCHEMA_VERSION {
            warn!(
                path = %path.display(),
                version = record.version,
                "unsupported checkpoint version, starting over"
            );
            return None;
        }

        debug!(
            path = %path.display(),
            committed = record.committed_count(),
            total = record.block_count(),
            "loaded checkpoint"
        );
        Some(record)
    }

    /// Writes the full record, replacing any previous content.
    pub async fn save(
        &self,
        record_key: &str,
        record: &ProgressRecord,
    ) -> Result<(), CheckpointError> {
        let data = serde_json::to_vec(record)?;
        tokio::fs::write(self.path_for(record_key), data).await?;
        Ok(())
    }

    /// Removes a record. Failures are logged, never returned.
    pub async fn delete(&self, record_key: &str) {
        let path = self.path_for(record_key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed checkpoint"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove checkpoint"),
        }
    }
}
