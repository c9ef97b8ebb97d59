//! Polling discovery of finished files.
//!
//! A file is considered finished once its modification time is at least
//! `prepared_time` in the past. When the modification time lies in the
//! future (clock skew, restored archives) the watcher instead requires the
//! `(mtime, size)` pair to stay unchanged for `prepared_time` on the
//! monotonic clock.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use hoist_transfer::{FileTask, TaskRegistry};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{DiscoveryError, Dispatcher};

/// Default pause between two scans.
pub const DEFAULT_WALK_INTERVAL: Duration = Duration::from_secs(10);

/// Default quiet period before a file counts as finished.
pub const DEFAULT_PREPARED_TIME: Duration = Duration::from_secs(30);

/// What to look for and how often.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub root: PathBuf,
    /// File name suffix; `"pdf"` and `".pdf"` are equivalent.
    pub suffix: String,
    pub walk_interval: Duration,
    pub prepared_time: Duration,
    /// Directories never descended into (the checkpoint directory).
    pub exclude: Vec<PathBuf>,
}

impl WatcherConfig {
    pub fn new(root: impl Into<PathBuf>, suffix: &str) -> Self {
        Self {
            root: root.into(),
            suffix: suffix.to_string(),
            walk_interval: DEFAULT_WALK_INTERVAL,
            prepared_time: DEFAULT_PREPARED_TIME,
            exclude: Vec::new(),
        }
    }
}

/// Counts from one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Files queued by this scan.
    pub eligible: usize,
    /// Matching files still being written.
    pub unstable: usize,
    /// Matching files already owned by the pipeline.
    pub queued_already: usize,
}

/// A matching regular file found by the walk.
#[derive(Debug)]
struct Candidate {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    modified: SystemTime,
    size: u64,
    since: Instant,
}

/// Watches a directory tree and queues finished files.
pub struct Watcher {
    config: WatcherConfig,
    suffix: String,
    registry: Arc<TaskRegistry>,
    dispatcher: Dispatcher,
    skewed: HashMap<PathBuf, Observation>,
}

impl Watcher {
    pub fn new(config: WatcherConfig, registry: Arc<TaskRegistry>, dispatcher: Dispatcher) -> Self {
        let suffix = normalize_suffix(&config.suffix);
        Self {
            config,
            suffix,
            registry,
            dispatcher,
            skewed: HashMap::new(),
        }
    }

    /// Scans until cancelled. Returns an error if a scan fails.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), DiscoveryError> {
        info!(
            root = %self.config.root.display(),
            suffix = %self.suffix,
            interval_secs = self.config.walk_interval.as_secs(),
            "watching for new files"
        );

        loop {
            let scan = tokio::select! {
                _ = cancel.cancelled() => break,
                scan = self.scan_once(SystemTime::now()) => scan,
            };
            match scan {
                Ok(summary) => info!(
                    eligible = summary.eligible,
                    unstable = summary.unstable,
                    queued = summary.queued_already,
                    pending = self.registry.len(),
                    "scan complete"
                ),
                Err(e) => {
                    error!(root = %self.config.root.display(), error = %e, "discovery stopped");
                    return Err(e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.walk_interval) => {}
            }
        }

        info!("watcher stopped");
        Ok(())
    }

    /// Walks the tree once, queueing every finished file not yet owned.
    pub async fn scan_once(&mut self, now: SystemTime) -> Result<ScanSummary, DiscoveryError> {
        let root = self.config.root.clone();
        let suffix = self.suffix.clone();
        let exclude = self.config.exclude.clone();
        let candidates =
            tokio::task::spawn_blocking(move || collect_candidates(&root, &suffix, &exclude))
                .await??;

        let mut summary = ScanSummary::default();
        let mut seen_skewed = HashMap::new();

        for candidate in candidates {
            let stable = if candidate.modified > now {
                let stable = self.settled(&candidate);
                if let Some(obs) = self.skewed.get(&candidate.path) {
                    seen_skewed.insert(candidate.path.clone(), *obs);
                }
                stable
            } else {
                now.duration_since(candidate.modified)
                    .is_ok_and(|age| age >= self.config.prepared_time)
            };

            if !stable {
                debug!(path = %candidate.path.display(), "file not finished yet");
                summary.unstable += 1;
                continue;
            }
            if !self.registry.try_insert(&candidate.path) {
                summary.queued_already += 1;
                continue;
            }

            self.skewed.remove(&candidate.path);
            seen_skewed.remove(&candidate.path);
            let task = FileTask::new(&candidate.path, candidate.modified, candidate.size);
            if let Err(e) = self.dispatcher.enqueue(task).await {
                self.registry.remove(&e.0.path);
                return Err(DiscoveryError::QueueClosed);
            }
            debug!(path = %candidate.path.display(), "queued");
            summary.eligible += 1;
        }

        self.skewed = seen_skewed;
        Ok(summary)
    }

    /// Quiet-period check for files whose mtime is ahead of the wall clock.
    fn settled(&mut self, candidate: &Candidate) -> bool {
        let now = Instant::now();
        let obs = self
            .skewed
            .entry(candidate.path.clone())
            .or_insert(Observation {
                modified: candidate.modified,
                size: candidate.size,
                since: now,
            });
        if obs.modified != candidate.modified || obs.size != candidate.size {
            *obs = Observation {
                modified: candidate.modified,
                size: candidate.size,
                since: now,
            };
        }
        now.duration_since(obs.since) >= self.config.prepared_time
    }
}

/// `"pdf"` → `".pdf"`; an empty suffix matches every file.
fn normalize_suffix(suffix: &str) -> String {
    if suffix.is_empty() || suffix.starts_with('.') {
        suffix.to_string()
    } else {
        format!(".{suffix}")
    }
}

fn collect_candidates(
    root: &Path,
    suffix: &str,
    exclude: &[PathBuf],
) -> Result<Vec<Candidate>, DiscoveryError> {
    let mut out = Vec::new();
    walk_dir(root, suffix, exclude, &mut out)?;
    Ok(out)
}

fn walk_dir(
    dir: &Path,
    suffix: &str,
    exclude: &[PathBuf],
    out: &mut Vec<Candidate>,
) -> Result<(), DiscoveryError> {
    let list_err = |source| DiscoveryError::ListDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = std::fs::read_dir(dir)
        .map_err(list_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(list_err)?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        // Not followed through symlinks: links are neither walked nor uploaded.
        let metadata = match entry.metadata() {
            Ok(m) => m,
            // Removed after listing, usually by a worker that just uploaded it.
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(source) => return Err(DiscoveryError::Stat { path, source }),
        };

        if metadata.is_dir() {
            if exclude.iter().any(|x| x == &path) {
                continue;
            }
            walk_dir(&path, suffix, exclude, out)?;
        } else if metadata.is_file() {
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(suffix));
            if !matches {
                continue;
            }
            let modified = match metadata.modified() {
                Ok(m) => m,
                Err(source) => return Err(DiscoveryError::Stat { path, source }),
            };
            out.push(Candidate {
                path,
                modified,
                size: metadata.len(),
            });
        }
    }

    Ok(())
}
