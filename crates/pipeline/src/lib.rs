//! Discovery-to-upload pipeline.
//!
//! [`Watcher`] polls a directory tree and pushes finished files through a
//! bounded [`Dispatcher`] queue to a [`WorkerPool`], whose workers hand each
//! file to the upload engine. The task registry shared by the watcher and
//! the engine guarantees a path is queued at most once at a time.

mod dispatcher;
mod watcher;
mod workers;

use std::path::PathBuf;

pub use dispatcher::{DEFAULT_QUEUE_CAPACITY, DispatchQueue, Dispatcher, QueueClosed, channel};
pub use watcher::{
    DEFAULT_PREPARED_TIME, DEFAULT_WALK_INTERVAL, ScanSummary, Watcher, WatcherConfig,
};
pub use workers::WorkerPool;

/// Errors that stop discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to list {}: {source}", path.display())]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stat {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dispatch queue closed")]
    QueueClosed,

    #[error("scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoist_checkpoint::CheckpointStore;
    use hoist_object_store::MemoryObjectStore;
    use hoist_transfer::{FailurePolicy, TaskRegistry, UploadEngine, UploadOptions, UploadStats};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct Pipeline {
        _tmp: TempDir,
        root: PathBuf,
        store: Arc<MemoryObjectStore>,
        engine: Arc<UploadEngine>,
        registry: Arc<TaskRegistry>,
        watcher: Watcher,
        queue: DispatchQueue,
    }

    async fn pipeline(policy: FailurePolicy) -> Pipeline {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("watch");
        std::fs::create_dir_all(&root).unwrap();
        let progress = root.join("progress");

        let store = Arc::new(MemoryObjectStore::new());
        let registry = Arc::new(TaskRegistry::new(policy));
        let engine = Arc::new(UploadEngine::new(
            store.clone(),
            CheckpointStore::open(&progress).await.unwrap(),
            Arc::clone(&registry),
            Arc::new(UploadStats::new()),
            UploadOptions {
                block_size: 4,
                ..UploadOptions::new("bucket")
            },
        ));

        let (tx, queue) = channel(DEFAULT_QUEUE_CAPACITY);
        let mut config = WatcherConfig::new(&root, ".pdf");
        config.walk_interval = Duration::from_millis(20);
        config.exclude.push(progress);
        let watcher = Watcher::new(config, Arc::clone(&registry), tx);

        Pipeline {
            _tmp: tmp,
            root,
            store,
            engine,
            registry,
            watcher,
            queue,
        }
    }

    fn write_old(path: &std::path::Path, data: &[u8]) {
        std::fs::write(path, data).unwrap();
        let f = std::fs::File::options().write(true).open(path).unwrap();
        f.set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();
    }

    #[tokio::test]
    async fn files_flow_from_discovery_to_store() {
        let mut p = pipeline(FailurePolicy::Hold).await;
        write_old(&p.root.join("a.pdf"), b"first document");
        write_old(&p.root.join("b.pdf"), b"second");
        write_old(&p.root.join("skip.txt"), b"ignored");

        let summary = p.watcher.scan_once(SystemTime::now()).await.unwrap();
        assert_eq!(summary.eligible, 2);
        drop(p.watcher);

        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(2, p.queue.clone(), Arc::clone(&p.engine), cancel);
        assert_eq!(pool.len(), 2);
        pool.join().await;

        assert_eq!(p.store.object("a.pdf").unwrap().data, b"first document");
        assert_eq!(p.store.object("b.pdf").unwrap().data, b"second");
        assert!(!p.root.join("a.pdf").exists());
        assert!(!p.root.join("b.pdf").exists());
        assert!(p.root.join("skip.txt").exists());
        assert!(p.registry.is_empty());
        assert_eq!(p.engine.stats().snapshot().uploaded, 2);
    }

    #[tokio::test]
    async fn failed_upload_is_retried_by_a_later_scan() {
        let mut p = pipeline(FailurePolicy::Retry {
            backoff: Duration::ZERO,
        })
        .await;
        write_old(&p.root.join("a.pdf"), b"0123456789");
        p.store.fail_block(Some(1));

        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(1, p.queue.clone(), Arc::clone(&p.engine), cancel.clone());

        assert_eq!(p.watcher.scan_once(SystemTime::now()).await.unwrap().eligible, 1);
        while p.engine.stats().snapshot().failed == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(p.registry.contains(&p.root.join("a.pdf")));

        p.store.fail_block(None);
        p.store.clear_put_log();
        assert_eq!(p.watcher.scan_once(SystemTime::now()).await.unwrap().eligible, 1);
        drop(p.watcher);
        pool.join().await;

        // Block 0 was checkpointed by the failed attempt.
        assert_eq!(p.store.put_indices(), vec![1, 2]);
        assert_eq!(p.store.object("a.pdf").unwrap().data, b"0123456789");
        assert!(p.registry.is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_idle_workers() {
        let p = pipeline(FailurePolicy::Hold).await;
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(3, p.queue.clone(), Arc::clone(&p.engine), cancel.clone());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), pool.join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn watcher_and_workers_run_until_cancelled() {
        let p = pipeline(FailurePolicy::Hold).await;
        write_old(&p.root.join("a.pdf"), b"hello");
        let cancel = CancellationToken::new();

        let pool = WorkerPool::spawn(2, p.queue.clone(), Arc::clone(&p.engine), cancel.clone());
        let watcher = tokio::spawn(p.watcher.run(cancel.clone()));

        while p.store.object("a.pdf").is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        assert!(watcher.await.unwrap().is_ok());
        pool.join().await;
        assert!(!p.root.join("a.pdf").exists());
    }
}
