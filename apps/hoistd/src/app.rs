//! Wires the watcher, queue, workers and upload engine together.

use std::sync::Arc;

use hoist_checkpoint::CheckpointStore;
use hoist_object_store::{Credentials, HttpObjectStore, ObjectStore};
use hoist_pipeline::{Watcher, WorkerPool, channel};
use hoist_transfer::{TaskRegistry, UploadEngine, UploadStats};
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Runs the daemon until ctrl-c, or until discovery fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let checkpoints = CheckpointStore::open(config.progress_dir()).await?;
    let store: Arc<dyn ObjectStore> = Arc::new(HttpObjectStore::new(
        &config.endpoint,
        Credentials::new(&config.access_key, &config.secret_key),
        config.token_ttl(),
    )?);
    let registry = Arc::new(TaskRegistry::new(config.failure_policy()));
    let stats = Arc::new(UploadStats::new());
    let engine = Arc::new(UploadEngine::new(
        store,
        checkpoints,
        Arc::clone(&registry),
        Arc::clone(&stats),
        config.upload_options(),
    ));

    let (dispatcher, queue) = channel(config.queue_capacity);
    let pool = WorkerPool::spawn(config.workers, queue, engine, cancel.clone());
    tracing::info!(workers = pool.len(), "upload workers started");

    let watcher = Watcher::new(config.watcher_config(), registry, dispatcher);
    let mut discovery = tokio::spawn(watcher.run(cancel.clone()));

    let outcome = tokio::select! {
        joined = &mut discovery => Some(joined),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
            None
        }
    };

    let result = match outcome {
        // Discovery ended on its own: its queue sender is gone, so workers
        // finish what is already queued and exit.
        Some(joined) => {
            let result = match joined {
                Ok(res) => res.map_err(anyhow::Error::from),
                Err(e) => Err(anyhow::Error::from(e)),
            };
            tracing::info!("draining queued uploads");
            let join = pool.join();
            tokio::pin!(join);
            let drained = tokio::select! {
                _ = &mut join => true,
                _ = tokio::signal::ctrl_c() => false,
            };
            if !drained {
                tracing::info!("SIGINT received, abandoning queued uploads");
                cancel.cancel();
                join.await;
            }
            result
        }
        None => {
            cancel.cancel();
            if let Ok(Err(e)) = discovery.await {
                tracing::warn!(error = %e, "discovery ended with error during shutdown");
            }
            pool.join().await;
            Ok(())
        }
    };

    let snapshot = stats.snapshot();
    tracing::info!(
        uploaded = snapshot.uploaded,
        failed = snapshot.failed,
        bytes = snapshot.bytes,
        "daemon stopped"
    );
    result
}
