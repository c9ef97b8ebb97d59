use std::sync::Arc;

use hoist_transfer::FileTask;
use tokio::sync::{Mutex, mpsc};

/// Default number of tasks buffered between discovery and the workers.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Returned by [`Dispatcher::enqueue`] once every [`DispatchQueue`] is gone.
#[derive(Debug, thiserror::Error)]
#[error("dispatch queue closed")]
pub struct QueueClosed(pub FileTask);

/// Creates a bounded FIFO of upload tasks.
pub fn channel(capacity: usize) -> (Dispatcher, DispatchQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Dispatcher { tx },
        DispatchQueue {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producer side, held by the watcher.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<FileTask>,
}

impl Dispatcher {
    /// Queues `task`, waiting while the queue is full.
    pub async fn enqueue(&self, task: FileTask) -> Result<(), QueueClosed> {
        self.tx.send(task).await.map_err(|e| QueueClosed(e.0))
    }
}

/// Consumer side, shared by all workers.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    rx: Arc<Mutex<mpsc::Receiver<FileTask>>>,
}

impl DispatchQueue {
    /// Waits for the next task. Returns `None` once every [`Dispatcher`] is
    /// dropped and the queue is drained.
    pub async fn dequeue(&self) -> Option<FileTask> {
        self.rx.lock().await.recv().await
    }

    /// Takes the next task if one is immediately available.
    pub fn try_dequeue(&self) -> Option<FileTask> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}
