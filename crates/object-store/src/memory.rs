//! In-memory object store with failure injection.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{BlockCommit, ObjectInfo, ObjectStore, StoreError, StoreFuture, UploadToken};

/// Default lifetime of a stored block context (seven days).
const DEFAULT_BLOCK_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// An object assembled by [`MemoryObjectStore::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct State {
    next_ctx: u64,
    blocks: HashMap<String, Vec<u8>>,
    put_log: Vec<u32>,
    objects: HashMap<String, StoredObject>,
    fail_block: Option<u32>,
    fail_finalize: bool,
    delays: HashMap<u32, Duration>,
    next_token: usize,
}

/// Object store keeping blocks and objects in memory.
pub struct MemoryObjectStore {
    state: Mutex<State>,
    block_lifetime: Duration,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            block_lifetime: DEFAULT_BLOCK_LIFETIME,
        }
    }

    /// Sets how long block contexts stay valid.
    pub fn with_block_lifetime(mut self, lifetime: Duration) -> Self {
        self.block_lifetime = lifetime;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every put of block `index` fail until cleared with `None`.
    pub fn fail_block(&self, index: Option<u32>) {
        self.state().fail_block = index;
    }

    /// Makes `finalize` fail while `fail` is set.
    pub fn fail_finalize(&self, fail: bool) {
        self.state().fail_finalize = fail;
    }

    /// Delays the put of block `index` by `delay`.
    pub fn delay_block(&self, index: u32, delay: Duration) {
        self.state().delays.insert(index, delay);
    }

    /// Block indices received so far, in arrival order.
    pub fn put_indices(&self) -> Vec<u32> {
        self.state().put_log.clone()
    }

    /// Forgets the put log.
    pub fn clear_put_log(&self) {
        self.state().put_log.clear();
    }

    /// Returns the finalized object stored under `key`.
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.state().objects.get(key).cloned()
    }

    /// Number of finalized objects.
    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    fn expires_at(&self) -> i64 {
        (SystemTime::now() + self.block_lifetime)
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn issue_upload_token(&self, bucket: &str) -> Result<UploadToken, StoreError> {
        let mut state = self.state();
        state.next_token += 1;
        Ok(UploadToken::new(
            format!("mem-token-{}", state.next_token),
            bucket,
        ))
    }

    fn put_block<'a>(
        &'a self,
        _token: &'a UploadToken,
        index: u32,
        data: Vec<u8>,
    ) -> StoreFuture<'a, BlockCommit> {
        Box::pin(async move {
            let delay = self.state().delays.get(&index).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut state = self.state();
            if state.fail_block == Some(index) {
                return Err(StoreError::Api {
                    status: 503,
                    body: format!("injected failure at block {index}"),
                });
            }

            state.put_log.push(index);
            state.next_ctx += 1;
            let ctx = format!("mem-ctx-{}", state.next_ctx);
            let crc32 = crc32fast::hash(&data);
            state.blocks.insert(ctx.clone(), data);

            Ok(BlockCommit {
                token: ctx,
                expires_at: self.expires_at(),
                checksum: format!("{crc32:08x}"),
                crc32,
            })
        })
    }

    fn finalize<'a>(
        &'a self,
        token: &'a UploadToken,
        key: &'a str,
        file_size: u64,
        block_tokens: Vec<String>,
    ) -> StoreFuture<'a, ObjectInfo> {
        Box::pin(async move {
            let mut state = self.state();
            if state.fail_finalize {
                return Err(StoreError::Api {
                    status: 503,
                    body: "injected finalize failure".into(),
                });
            }

            let mut data = Vec::new();
            for ctx in &block_tokens {
                let block = state.blocks.get(ctx).ok_or_else(|| StoreError::Api {
                    status: 400,
                    body: format!("unknown block context {ctx}"),
                })?;
                data.extend_from_slice(block);
            }
            if data.len() as u64 != file_size {
                return Err(StoreError::Api {
                    status: 400,
                    body: format!("size mismatch: got {} want {file_size}", data.len()),
                });
            }

            let hash = format!("{:08x}", crc32fast::hash(&data));
            state.objects.insert(
                key.to_string(),
                StoredObject {
                    bucket: token.bucket().to_string(),
                    data,
                },
            );
            Ok(ObjectInfo {
                key: key.to_string(),
                hash,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assembles_blocks_in_token_order() {
        let store = MemoryObjectStore::new();
        let token = store.issue_upload_token("bucket").unwrap();

        let b1 = store.put_block(&token, 1, b"world".to_vec()).await.unwrap();
        let b0 = store.put_block(&token, 0, b"hello ".to_vec()).await.unwrap();
        assert_eq!(store.put_indices(), vec![1, 0]);

        let info = store
            .finalize(&token, "greeting", 11, vec![b0.token, b1.token])
            .await
            .unwrap();
        assert_eq!(info.key, "greeting");

        let object = store.object("greeting").unwrap();
        assert_eq!(object.data, b"hello world");
        assert_eq!(object.bucket, "bucket");
    }

    #[tokio::test]
    async fn injected_block_failure() {
        let store = MemoryObjectStore::new();
        let token = store.issue_upload_token("bucket").unwrap();
        store.fail_block(Some(2));

        assert!(store.put_block(&token, 1, vec![0]).await.is_ok());
        assert!(store.put_block(&token, 2, vec![0]).await.is_err());
        assert_eq!(store.put_indices(), vec![1]);

        store.fail_block(None);
        assert!(store.put_block(&token, 2, vec![0]).await.is_ok());
    }

    #[tokio::test]
    async fn finalize_rejects_unknown_context_and_bad_size() {
        let store = MemoryObjectStore::new();
        let token = store.issue_upload_token("bucket").unwrap();
        let b0 = store.put_block(&token, 0, vec![1, 2]).await.unwrap();

        assert!(
            store
                .finalize(&token, "k", 2, vec!["nope".into()])
                .await
                .is_err()
        );
        assert!(
            store
                .finalize(&token, "k", 3, vec![b0.token.clone()])
                .await
                .is_err()
        );

        store.fail_finalize(true);
        assert!(store.finalize(&token, "k", 2, vec![b0.token]).await.is_err());
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn block_lifetime_sets_expiry() {
        let store = MemoryObjectStore::new().with_block_lifetime(Duration::from_secs(60));
        let token = store.issue_upload_token("bucket").unwrap();
        let commit = store.put_block(&token, 0, vec![9]).await.unwrap();

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        assert!(commit.expires_at >= now + 59 && commit.expires_at <= now + 61);
    }
}
