//! A fixed set of workers sharing one queue, store and generator.

use std::sync::Arc;

use melodia_core::artifact::ArtifactStore;
use melodia_core::generation::GenerationCapability;
use melodia_core::queue::JobQueue;
use tokio_util::sync::CancellationToken;

use crate::cache::ArtifactCache;
use crate::config::WorkerConfig;
use crate::resolver::ArtifactResolver;
use crate::worker::Worker;

pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Build `config.concurrency` workers named `<worker_id>-<n>`.
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ArtifactStore>,
        generator: Arc<dyn GenerationCapability>,
        cache: ArtifactCache,
    ) -> Self {
        let config = Arc::new(config);
        let resolver = Arc::new(ArtifactResolver::new(
            Arc::clone(&store),
            cache,
            config.fetch_timeout,
            config.fetch_attempts,
            config.fetch_backoff.clone(),
        ));

        let workers = (1..=config.concurrency.max(1))
            .map(|n| {
                Worker::new(
                    format!("{}-{n}", config.worker_id),
                    Arc::clone(&queue),
                    Arc::clone(&store),
                    Arc::clone(&generator),
                    Arc::clone(&resolver),
                    Arc::clone(&config),
                )
            })
            .collect();

        Self { workers }
    }

    pub fn worker_ids(&self) -> Vec<&str> {
        self.workers.iter().map(Worker::id).collect()
    }

    /// Run every worker until `shutdown` fires, then wait for all of them.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(workers = self.workers.len(), "Worker pool started");

        let handles = self.workers.into_iter().map(|worker| {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        });

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }

        tracing::info!("Worker pool stopped");
    }
}
