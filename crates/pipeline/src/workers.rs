use std::sync::Arc;

use hoist_transfer::UploadEngine;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::DispatchQueue;

/// Fixed set of tasks pulling uploads off a shared queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `workers` upload tasks.
    ///
    /// Each worker finishes one upload before taking the next. Workers exit
    /// when the queue is closed and drained, or when `cancel` fires; an
    /// upload cut short by cancellation keeps its checkpoint.
    pub fn spawn(
        workers: usize,
        queue: DispatchQueue,
        engine: Arc<UploadEngine>,
        cancel: CancellationToken,
    ) -> Self {
        let handles = (0..workers.max(1))
            .map(|id| {
                let queue = queue.clone();
                let engine = Arc::clone(&engine);
                let cancel = cancel.clone();
                tokio::spawn(async move { run_worker(id, queue, engine, cancel).await })
            })
            .collect();
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("upload worker panicked: {e}");
            }
        }
    }
}

async fn run_worker(
    id: usize,
    queue: DispatchQueue,
    engine: Arc<UploadEngine>,
    cancel: CancellationToken,
) {
    tracing::info!(worker = id, "upload worker started");

    loop {
        let task = tokio::select! {
            _ = cancel.cancelled() => break,
            task = queue.dequeue() => match task {
                Some(task) => task,
                None => break,
            },
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(
                    worker = id,
                    path = %task.path.display(),
                    "shutting down, upload abandoned"
                );
                break;
            }
            result = engine.upload(&task) => match result {
                Ok(report) => tracing::info!(
                    worker = id,
                    path = %task.path.display(),
                    key = %report.key,
                    uploaded = report.blocks_uploaded,
                    resumed = report.blocks_resumed,
                    "file uploaded"
                ),
                Err(e) => {
                    tracing::error!(
                        worker = id,
                        path = %task.path.display(),
                        error = %e,
                        "upload failed"
                    );
                    engine.record_failure(&task.path, &e);
                }
            },
        }
    }

    tracing::info!(worker = id, "upload worker stopped");
}
