//! Resumable block uploads of single files with checkpoint persistence.
//!
//! [`UploadEngine`] splits a file into fixed-size blocks, uploads the ones
//! not yet committed, records every commit in a checkpoint, and finalizes
//! the remote object once all blocks are in. [`TaskRegistry`] tracks which
//! paths are currently owned by the pipeline.

mod engine;
mod reader;
mod registry;
mod stats;
mod task;

pub use engine::{ResumeState, UploadEngine, UploadOptions, UploadReport};
pub use reader::BlockReader;
pub use registry::{EntryState, FailurePolicy, TaskRegistry};
pub use stats::{StatsSnapshot, UploadStats};
pub use task::FileTask;

/// Default block size: 4 MiB.
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Default number of blocks of one file uploaded at the same time.
pub const DEFAULT_BLOCK_CONCURRENCY: usize = 1;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store error: {0}")]
    Store(#[from] hoist_object_store::StoreError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] hoist_checkpoint::CheckpointError),

    #[error("block read task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}
