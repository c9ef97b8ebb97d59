//! Upload checkpoints: which blocks of a file already reached the remote store.
//!
//! A checkpoint is keyed by a [`Fingerprint`] of the destination and of the
//! local file version (path + modification time), so a file that is saved
//! again never resumes from progress recorded for its previous content.

mod fingerprint;
mod record;
mod store;

pub use fingerprint::{Fingerprint, unix_nanos};
pub use record::{BlockState, ProgressRecord, SCHEMA_VERSION, block_count};
pub use store::CheckpointStore;

/// File extension of a persisted progress record.
pub const RECORD_EXTENSION: &str = "progress";

/// Name of the checkpoint directory created under the watch root.
pub const DEFAULT_PROGRESS_DIR: &str = "progress";

/// Errors produced by the checkpoint crate.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("block index {index} out of range ({count} blocks)")]
    BlockOutOfRange { index: u32, count: u32 },
}
