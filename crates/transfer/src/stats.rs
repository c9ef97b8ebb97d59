use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide upload counters.
#[derive(Debug, Default)]
pub struct UploadStats {
    uploaded: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
}

/// Point-in-time copy of [`UploadStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uploaded: u64,
    pub failed: u64,
    pub bytes: u64,
}

impl UploadStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a finalized file and returns the new total.
    pub fn record_success(&self, bytes: u64) -> u64 {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.uploaded.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Counts a failed attempt and returns the new total.
    pub fn record_failure(&self) -> u64 {
        self.failed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uploaded: self.uploaded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}
