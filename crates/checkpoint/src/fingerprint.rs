use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};

use crate::RECORD_EXTENSION;

/// Deterministic identity of one version of a local file bound for one
/// destination object.
///
/// The digest is `hex(md5("bucket:key:local_path:modified_nanos"))`. Two
/// tasks with the same fingerprint are assumed to address identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    digest: String,
}

impl Fingerprint {
    /// Computes the fingerprint of `local_path` as last modified at
    /// `modified_nanos` (nanoseconds since the Unix epoch).
    pub fn new(bucket: &str, key: &str, local_path: &Path, modified_nanos: i128) -> Self {
        let source = format!(
            "{bucket}:{key}:{}:{modified_nanos}",
            local_path.display()
        );
        let digest = Md5::digest(source.as_bytes());
        Self {
            digest: hex::encode(digest),
        }
    }

    /// Hex-encoded MD5 digest (32 characters).
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// File name of the progress record for this fingerprint.
    pub fn record_key(&self) -> String {
        format!("{}.{RECORD_EXTENSION}", self.digest)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest)
    }
}

/// Converts a timestamp to signed nanoseconds since the Unix epoch.
pub fn unix_nanos(time: SystemTime) -> i128 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i128,
        Err(e) => -(e.duration().as_nanos() as i128),
    }
}
