//! Remote object store used by the upload engine.
//!
//! The engine only talks to the [`ObjectStore`] trait: issue a token, put
//! fixed-size blocks (in any order), then finalize the object from the block
//! contexts in index order. [`HttpObjectStore`] speaks the mkblk/mkfile
//! protocol; [`MemoryObjectStore`] (feature `mock`) keeps everything in memory.

mod credentials;
mod http;
#[cfg(any(test, feature = "mock"))]
mod memory;

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

pub use credentials::{Credentials, PutPolicy};
pub use hoist_checkpoint::{BlockState, block_count};
pub use http::{DEFAULT_TOKEN_TTL, HttpObjectStore};
#[cfg(any(test, feature = "mock"))]
pub use memory::{MemoryObjectStore, StoredObject};

/// A committed block context is treated as expired this long before the
/// deadline reported by the store.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors produced by object store clients.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("block {index} failed integrity check: sent crc32 {expected:08x}, store saw {actual:08x}")]
    Integrity {
        index: u32,
        expected: u32,
        actual: u32,
    },

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Boxed future returned by [`ObjectStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Short-lived authorization for uploads into one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadToken {
    token: String,
    bucket: String,
}

impl UploadToken {
    pub fn new(token: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            bucket: bucket.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Store's acknowledgement of one uploaded block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCommit {
    /// Opaque block context, needed to finalize the object.
    pub token: String,
    /// Unix seconds after which the store forgets the block.
    pub expires_at: i64,
    pub checksum: String,
    pub crc32: u32,
}

/// A finalized remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub hash: String,
}

/// Remote store accepting resumable block uploads.
pub trait ObjectStore: Send + Sync {
    /// Issues a token authorizing uploads into `bucket`.
    fn issue_upload_token(&self, bucket: &str) -> Result<UploadToken, StoreError>;

    /// Uploads block `index` of a file. The returned context stays valid
    /// until `expires_at`.
    fn put_block<'a>(
        &'a self,
        token: &'a UploadToken,
        index: u32,
        data: Vec<u8>,
    ) -> StoreFuture<'a, BlockCommit>;

    /// Assembles the object `key` from `block_tokens`, given in index order.
    fn finalize<'a>(
        &'a self,
        token: &'a UploadToken,
        key: &'a str,
        file_size: u64,
        block_tokens: Vec<String>,
    ) -> StoreFuture<'a, ObjectInfo>;

    /// Returns `true` if a committed block can no longer be relied upon.
    ///
    /// Uncommitted blocks never expire. A committed block without a deadline
    /// is treated as expired.
    fn is_expired(&self, block: &BlockState, now: SystemTime) -> bool {
        if !block.committed {
            return false;
        }
        match block.expires_at_time() {
            Some(deadline) => now + EXPIRY_MARGIN >= deadline,
            None => true,
        }
    }
}
