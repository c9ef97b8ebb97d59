//! Per-file resumable upload.
//!
//! The lifecycle of one fingerprint is:
//!
//! 1. no checkpoint: every block pending
//! 2. partially uploaded: some blocks committed and recorded on disk
//! 3. all blocks committed
//! 4. finalized: object assembled, source and checkpoint removed
//!
//! A checkpoint with an expired block, or one describing a different file
//! layout, sends the file back to step 1.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use futures_util::{TryStreamExt, stream};
use hoist_checkpoint::{CheckpointStore, Fingerprint, ProgressRecord, unix_nanos};
use hoist_object_store::{ObjectStore, UploadToken};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    BlockReader, DEFAULT_BLOCK_CONCURRENCY, DEFAULT_BLOCK_SIZE, FileTask, TaskRegistry,
    TransferError, UploadStats,
};

/// Upload settings shared by every file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub bucket: String,
    pub block_size: u64,
    /// Blocks of one file in flight at once.
    pub block_concurrency: usize,
    /// Prepended to the file name to form the object key.
    pub key_prefix: String,
}

impl UploadOptions {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            block_concurrency: DEFAULT_BLOCK_CONCURRENCY,
            key_prefix: String::new(),
        }
    }

    /// Object key for `path`: `key_prefix` followed by the file name.
    pub fn object_key(&self, path: &Path) -> Result<String, TransferError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidPath(path.display().to_string()))?;
        Ok(format!("{}{name}", self.key_prefix))
    }
}

/// How the checkpoint found at the start of an upload was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeState {
    /// No usable progress; every block uploaded.
    Fresh,
    /// Continued from a checkpoint with `committed` blocks already stored.
    Resumed { committed: u32 },
    /// A block context had expired; the checkpoint was discarded.
    ResetExpired,
    /// The checkpoint described another file version or block layout.
    ResetMismatch,
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub key: String,
    pub hash: String,
    pub size: u64,
    pub blocks_total: u32,
    /// Blocks sent during this invocation.
    pub blocks_uploaded: u32,
    /// Blocks taken over from the checkpoint.
    pub blocks_resumed: u32,
    pub resume_state: ResumeState,
    pub elapsed: Duration,
}

/// Uploads files block by block, resuming from checkpoints.
pub struct UploadEngine {
    store: Arc<dyn ObjectStore>,
    checkpoints: CheckpointStore,
    registry: Arc<TaskRegistry>,
    stats: Arc<UploadStats>,
    options: UploadOptions,
}

impl UploadEngine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        checkpoints: CheckpointStore,
        registry: Arc<TaskRegistry>,
        stats: Arc<UploadStats>,
        options: UploadOptions,
    ) -> Self {
        Self {
            store,
            checkpoints,
            registry,
            stats,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<UploadStats> {
        &self.stats
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Uploads `task` to completion.
    ///
    /// Any block or finalize failure aborts the attempt and leaves the
    /// checkpoint in place for the next one.
    pub async fn upload(&self, task: &FileTask) -> Result<UploadReport, TransferError> {
        let started = Instant::now();
        let path = task.path.as_path();

        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(TransferError::InvalidPath(path.display().to_string()));
        }
        let size = meta.len();
        let modified = meta.modified()?;
        let key = self.options.object_key(path)?;

        let fingerprint = Fingerprint::new(&self.options.bucket, &key, path, unix_nanos(modified));
        let record_key = fingerprint.record_key();
        let (record, resume_state) = self.prepare_record(&fingerprint, &record_key, size).await;

        let blocks_total = record.block_count();
        let blocks_resumed = record.committed_count();
        let pending = record.pending_indices();
        info!(
            path = %path.display(),
            key = %key,
            size,
            blocks = blocks_total,
            resumed = blocks_resumed,
            state = ?resume_state,
            "uploading"
        );

        let token = self.store.issue_upload_token(&self.options.bucket)?;
        let reader = BlockReader::new(path, self.options.block_size, size);
        let record = Mutex::new(record);
        let blocks_uploaded = pending.len() as u32;

        {
            let (reader, token, record, record_key) = (&reader, &token, &record, &record_key);
            stream::iter(pending.into_iter().map(Ok::<u32, TransferError>))
                .try_for_each_concurrent(self.options.block_concurrency.max(1), move |index| {
                    self.upload_block(reader, token, index, record, record_key)
                })
                .await?;
        }

        let block_tokens = record.lock().await.block_tokens();
        let object = self
            .store
            .finalize(&token, &key, size, block_tokens)
            .await?;

        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "uploaded but failed to remove source");
        }
        self.checkpoints.delete(&record_key).await;
        self.registry.remove(path);
        let total = self.stats.record_success(size);

        let elapsed = started.elapsed();
        info!(
            path = %path.display(),
            key = %object.key,
            hash = %object.hash,
            elapsed_ms = elapsed.as_millis() as u64,
            total,
            "upload finalized, {total} files uploaded so far"
        );

        Ok(UploadReport {
            key: object.key,
            hash: object.hash,
            size,
            blocks_total,
            blocks_uploaded,
            blocks_resumed,
            resume_state,
            elapsed,
        })
    }

    /// Counts a failed attempt and hands `path` to the registry's failure
    /// policy. A file that no longer exists is dropped from the registry.
    pub fn record_failure(&self, path: &Path, error: &TransferError) {
        if matches!(error, TransferError::Io(e) if e.kind() == ErrorKind::NotFound) {
            self.registry.remove(path);
            let failed = self.stats.record_failure();
            debug!(path = %path.display(), failed, "source vanished, forgetting it");
            return;
        }
        self.registry.mark_failed(path);
        let failed = self.stats.record_failure();
        debug!(path = %path.display(), failed, policy = ?self.registry.policy(), "upload failed");
    }

    /// Loads the checkpoint for `fingerprint` and decides how much of it to
    /// trust.
    async fn prepare_record(
        &self,
        fingerprint: &Fingerprint,
        record_key: &str,
        size: u64,
    ) -> (ProgressRecord, ResumeState) {
        let block_size = self.options.block_size;
        let fresh = || ProgressRecord::fresh(fingerprint, size, block_size);

        let Some(record) = self.checkpoints.load(record_key).await else {
            return (fresh(), ResumeState::Fresh);
        };

        let now = SystemTime::now();
        if record
            .progresses
            .iter()
            .any(|block| self.store.is_expired(block, now))
        {
            info!(record = record_key, "checkpoint has expired blocks, starting over");
            return (fresh(), ResumeState::ResetExpired);
        }

        if !record.matches(fingerprint, size, block_size) {
            info!(record = record_key, "checkpoint does not match file, starting over");
            return (fresh(), ResumeState::ResetMismatch);
        }

        match record.committed_count() {
            0 => (record, ResumeState::Fresh),
            committed => (record, ResumeState::Resumed { committed }),
        }
    }

    /// Uploads one block and records its commit before returning.
    async fn upload_block(
        &self,
        reader: &BlockReader,
        token: &UploadToken,
        index: u32,
        record: &Mutex<ProgressRecord>,
        record_key: &str,
    ) -> Result<(), TransferError> {
        let data = reader.read_block(index).await?;
        let len = data.len();
        let commit = self.store.put_block(token, index, data).await?;

        let mut record = record.lock().await;
        record.commit(index, commit.token, commit.expires_at)?;
        if let Err(e) = self.checkpoints.save(record_key, &record).await {
            warn!(record = record_key, index, error = %e, "failed to persist checkpoint");
        }
        debug!(
            record = record_key,
            index,
            len,
            committed = record.committed_count(),
            total = record.block_count(),
            "block committed"
        );
        Ok(())
    }
}
