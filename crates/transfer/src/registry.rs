use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// What happens to a path whose upload attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Eligible again once `backoff` has elapsed.
    Retry { backoff: Duration },
    /// Stays registered until the process restarts.
    Hold,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Retry {
            backoff: Duration::from_secs(60),
        }
    }
}

/// Registry state of one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    InFlight,
    RetryAfter(Instant),
    Held,
}

/// Paths currently owned by the pipeline.
///
/// A path is inserted when it is queued and removed when its upload
/// succeeds, so discovery never queues the same file twice.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    entries: Mutex<HashMap<PathBuf, EntryState>>,
    policy: FailurePolicy,
}

impl TaskRegistry {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, EntryState>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims `path` for upload. Returns `false` if it is already owned.
    ///
    /// A failed path whose backoff has elapsed is claimed again.
    pub fn try_insert(&self, path: &Path) -> bool {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(path).copied() {
            None => {
                entries.insert(path.to_path_buf(), EntryState::InFlight);
                true
            }
            Some(EntryState::RetryAfter(at)) if now >= at => {
                debug!(path = %path.display(), "retrying failed upload");
                entries.insert(path.to_path_buf(), EntryState::InFlight);
                true
            }
            Some(_) => false,
        }
    }

    /// Releases `path` after a successful upload.
    pub fn remove(&self, path: &Path) -> bool {
        self.entries().remove(path).is_some()
    }

    /// Applies the failure policy to `path`.
    pub fn mark_failed(&self, path: &Path) {
        let state = match self.policy {
            FailurePolicy::Retry { backoff } => EntryState::RetryAfter(Instant::now() + backoff),
            FailurePolicy::Hold => EntryState::Held,
        };
        self.entries().insert(path.to_path_buf(), state);
    }

    pub fn state(&self, path: &Path) -> Option<EntryState> {
        self.entries().get(path).copied()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
