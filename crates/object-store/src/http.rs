//! HTTP client for the mkblk/mkfile block upload protocol.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde::Deserialize;
use tracing::debug;

use crate::{
    BlockCommit, Credentials, ObjectInfo, ObjectStore, PutPolicy, StoreError, StoreFuture,
    UploadToken,
};

/// Default lifetime of an issued upload token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Reply to `mkblk`.
#[derive(Debug, Deserialize)]
struct BlockPutReply {
    ctx: String,
    #[serde(default)]
    checksum: String,
    crc32: u32,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    host: String,
    expired_at: i64,
}

/// Reply to `mkfile`.
#[derive(Debug, Deserialize)]
struct FilePutReply {
    hash: String,
    #[serde(default)]
    key: String,
}

/// Object store reached over HTTP.
pub struct HttpObjectStore {
    http: reqwest::Client,
    endpoint: String,
    credentials: Credentials,
    token_ttl: Duration,
}

impl HttpObjectStore {
    /// Creates a client for the upload host at `endpoint`
    /// (e.g. `https://upload.example.com`).
    pub fn new(
        endpoint: &str,
        credentials: Credentials,
        token_ttl: Duration,
    ) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credentials,
            token_ttl,
        })
    }

    /// Sends an authenticated POST and returns the response body.
    async fn post(
        &self,
        token: &UploadToken,
        path: &str,
        content_type: &'static str,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, StoreError> {
        let url = format!("{}{}", self.endpoint, path);
        let auth = HeaderValue::from_str(&format!("UpToken {}", token.as_str()))
            .map_err(|e| StoreError::InvalidCredentials(e.to_string()))?;

        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, auth)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

impl ObjectStore for HttpObjectStore {
    fn issue_upload_token(&self, bucket: &str) -> Result<UploadToken, StoreError> {
        let deadline = (SystemTime::now() + self.token_ttl)
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        let policy = PutPolicy {
            scope: bucket.to_string(),
            deadline,
        };
        let token = self.credentials.upload_token(&policy)?;
        Ok(UploadToken::new(token, bucket))
    }

    fn put_block<'a>(
        &'a self,
        token: &'a UploadToken,
        index: u32,
        data: Vec<u8>,
    ) -> StoreFuture<'a, BlockCommit> {
        Box::pin(async move {
            let expected = crc32fast::hash(&data);
            let path = format!("/mkblk/{}", data.len());
            let body = self
                .post(token, &path, "application/octet-stream", data)
                .await?;
            let reply: BlockPutReply = serde_json::from_slice(&body)?;

            if reply.crc32 != expected {
                return Err(StoreError::Integrity {
                    index,
                    expected,
                    actual: reply.crc32,
                });
            }

            debug!(
                index,
                offset = reply.offset,
                host = %reply.host,
                expires_at = reply.expired_at,
                "block stored"
            );
            Ok(BlockCommit {
                token: reply.ctx,
                expires_at: reply.expired_at,
                checksum: reply.checksum,
                crc32: reply.crc32,
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
            let path = format!("/mkfile/{file_size}/key/{}", URL_SAFE.encode(key));
            let body = block_tokens.join(",").into_bytes();
            let resp = self.post(token, &path, "text/plain", body).await?;
            let reply: FilePutReply = serde_json::from_slice(&resp)?;

            Ok(ObjectInfo {
                key: if reply.key.is_empty() {
                    key.to_string()
                } else {
                    reply.key
                },
                hash: reply.hash,
            })
        })
    }
}
