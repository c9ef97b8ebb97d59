use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::TransferError;

/// Reads fixed-size blocks of a file by index.
///
/// Block `i` covers bytes `[i * block_size, min((i + 1) * block_size, size))`.
/// Each read opens the file on the blocking pool, so blocks of the same file
/// can be read concurrently.
#[derive(Debug, Clone)]
pub struct BlockReader {
    path: PathBuf,
    block_size: u64,
    file_size: u64,
}

impl BlockReader {
    pub fn new(path: &Path, block_size: u64, file_size: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            block_size,
            file_size,
        }
    }

    /// Byte range `(offset, len)` of block `index`.
    pub fn block_range(&self, index: u32) -> (u64, u64) {
        let offset = u64::from(index) * self.block_size;
        let len = self
            .file_size
            .saturating_sub(offset)
            .min(self.block_size);
        (offset, len)
    }

    /// Reads block `index`. Fails if the file is shorter than expected.
    pub async fn read_block(&self, index: u32) -> Result<Vec<u8>, TransferError> {
        let (offset, len) = self.block_range(index);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_at(&path, offset, len)).await?
    }
}

fn read_at(path: &Path, offset: u64, len: u64) -> Result<Vec<u8>, TransferError> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}
