use crate::collector::{BatchCollector, DeletionSubmitter};
use crate::dispatcher::{Dispatcher, SharedQueue};
use crate::error::{PipelineError, Result};
use crate::settings::BatchSettings;
use linkvault_core::{DeletionTask, LinkStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Collector plus dispatcher pool applying queued deletions to a store.
///
/// Stopping order: the cancellation token is fired first, which makes every
/// submitter fail fast with [`PipelineError::Closed`], then the workers are
/// joined. The channels themselves are closed only when the pipeline is
/// dropped, after all of that.
pub struct DeletionPipeline<S> {
    store: Arc<S>,
    submitter: DeletionSubmitter,
    queue: Arc<SharedQueue>,
    cancel: CancellationToken,
    collector: JoinSet<()>,
    dispatchers: JoinSet<Result<()>>,
}

impl<S: LinkStore> DeletionPipeline<S> {
    /// Spawns the collector and `settings.dispatchers` dispatchers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(store: Arc<S>, settings: BatchSettings) -> Result<Self> {
        settings.validate()?;
        if settings.flush_threshold > settings.queue_capacity {
            warn!(
                flush_threshold = settings.flush_threshold,
                queue_capacity = settings.queue_capacity,
                "flush threshold exceeds queue capacity, only the interval will flush a full queue"
            );
        }

        let cancel = CancellationToken::new();
        let (tasks_tx, tasks_rx) = mpsc::channel(settings.queue_capacity);
        let (submitted_tx, submitted_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();

        let queue = Arc::new(SharedQueue::new(tasks_rx, signals_rx));
        let submitter = DeletionSubmitter::new(tasks_tx, submitted_tx, cancel.clone());

        let mut collector = JoinSet::new();
        collector.spawn(
            BatchCollector::new(
                submitted_rx,
                signals_tx,
                settings.flush_threshold,
                settings.flush_interval,
                cancel.clone(),
            )
            .run(),
        );

        let mut dispatchers = JoinSet::new();
        for id in 0..settings.dispatchers {
            let dispatcher =
                Dispatcher::new(id, Arc::clone(&store), Arc::clone(&queue), cancel.clone());
            dispatchers.spawn(dispatcher.run());
        }

        info!(
            queue_capacity = settings.queue_capacity,
            flush_threshold = settings.flush_threshold,
            flush_interval = ?settings.flush_interval,
            dispatchers = settings.dispatchers,
            "deletion pipeline started"
        );

        Ok(Self {
            store,
            submitter,
            queue,
            cancel,
            collector,
            dispatchers,
        })
    }

    /// Returns a handle for submitting tasks from other tasks.
    pub fn submitter(&self) -> DeletionSubmitter {
        self.submitter.clone()
    }

    pub async fn submit(&self, task: DeletionTask) -> Result<()> {
        self.submitter.submit(task).await
    }

    /// Stops the pipeline without flushing; queued tasks are abandoned.
    ///
    /// Returns the first error reported by a dispatcher, if any failed.
    pub async fn stop(mut self) -> Result<()> {
        let outcome = self.stop_workers().await;
        let abandoned = self.queue.drain().await.len();
        if abandoned > 0 {
            warn!(abandoned, "deletion pipeline stopped with unflushed tasks");
        }
        info!("deletion pipeline stopped");
        outcome
    }

    /// Stops the pipeline, then applies whatever is still queued in one
    /// final bulk delete. Returns the number of tasks in that final batch.
    pub async fn shutdown(mut self) -> Result<usize> {
        let outcome = self.stop_workers().await;

        let batch = self.queue.drain().await;
        if !batch.is_empty() {
            let flipped = self.store.bulk_soft_delete(&batch).await?;
            info!(
                batch_size = batch.len(),
                flipped, "applied final deletion batch"
            );
        }

        info!("deletion pipeline shut down");
        outcome.map(|()| batch.len())
    }

    async fn stop_workers(&mut self) -> Result<()> {
        self.cancel.cancel();

        while let Some(joined) = self.collector.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "collector task failed");
            }
        }

        let mut first_error = None;
        while let Some(joined) = self.dispatchers.join_next().await {
            let result = joined.map_err(|err| PipelineError::Join(err.to_string()));
            if let Err(err) = result.and_then(|outcome| outcome) {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
