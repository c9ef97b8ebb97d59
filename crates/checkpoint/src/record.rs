use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{CheckpointError, Fingerprint};

/// Version of the on-disk progress record layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Number of fixed-size blocks needed for `file_size` bytes.
///
/// Returns 0 for an empty file or a zero block size.
pub fn block_count(file_size: u64, block_size: u64) -> u32 {
    if block_size == 0 {
        return 0;
    }
    u32::try_from(file_size.div_ceil(block_size)).unwrap_or(u32::MAX)
}

/// Remote state of one block of a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockState {
    /// Position of the block; covers bytes `index * block_size ..`.
    pub index: u32,
    /// Opaque block context returned by the object store.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    /// Unix seconds after which the store forgets `token` (0 = never committed).
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub committed: bool,
}

impl BlockState {
    /// An uncommitted block.
    pub fn pending(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// `expires_at` as a timestamp, if the block carries one.
    pub fn expires_at_time(&self) -> Option<SystemTime> {
        let secs = u64::try_from(self.expires_at).ok().filter(|s| *s > 0)?;
        Some(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

/// Persisted checkpoint for one [`Fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub version: u32,
    pub fingerprint: String,
    pub file_size: u64,
    pub block_size: u64,
    pub progresses: Vec<BlockState>,
}

impl ProgressRecord {
    /// A record with every block uncommitted.
    pub fn fresh(fingerprint: &Fingerprint, file_size: u64, block_size: u64) -> Self {
        let count = block_count(file_size, block_size);
        Self {
            version: SCHEMA_VERSION,
            fingerprint: fingerprint.digest().to_string(),
            file_size,
            block_size,
            progresses: (0..count).map(BlockState::pending).collect(),
        }
    }

    /// Number of blocks described by this record.
    pub fn block_count(&self) -> u32 {
        u32::try_from(self.progresses.len()).unwrap_or(u32::MAX)
    }

    /// Returns `true` if the record describes exactly the given file version
    /// with the given block layout.
    pub fn matches(&self, fingerprint: &Fingerprint, file_size: u64, block_size: u64) -> bool {
        self.version == SCHEMA_VERSION
            && self.fingerprint == fingerprint.digest()
            && self.file_size == file_size
            && self.block_size == block_size
            && self.block_count() == block_count(file_size, block_size)
            && self
                .progresses
                .iter()
                .enumerate()
                .all(|(i, block)| block.index as usize == i)
    }

    /// Marks block `index` as committed with the store's context.
    pub fn commit(
        &mut self,
        index: u32,
        token: impl Into<String>,
        expires_at: i64,
    ) -> Result<(), CheckpointError> {
        let count = self.block_count();
        let block = self
            .progresses
            .get_mut(index as usize)
            .ok_or(CheckpointError::BlockOutOfRange { index, count })?;
        block.token = token.into();
        block.expires_at = expires_at;
        block.committed = true;
        Ok(())
    }

    /// Forgets every committed block.
    pub fn reset(&mut self) {
        for block in &mut self.progresses {
            *block = BlockState::pending(block.index);
        }
    }

    /// Indices of blocks that still have to be uploaded, ascending.
    pub fn pending_indices(&self) -> Vec<u32> {
        self.progresses
            .iter()
            .filter(|b| !b.committed)
            .map(|b| b.index)
            .collect()
    }

    pub fn committed_count(&self) -> u32 {
        self.progresses.iter().filter(|b| b.committed).count() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.progresses.iter().all(|b| b.committed)
    }

    /// Committed block contexts in index order, as needed to finalize.
    pub fn block_tokens(&self) -> Vec<String> {
        self.progresses.iter().map(|b| b.token.clone()).collect()
    }
}
