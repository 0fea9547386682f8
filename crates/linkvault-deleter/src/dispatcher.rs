use crate::collector::FlushSignal;
use crate::error::{PipelineError, Result};
use linkvault_core::{DeletionTask, LinkStore};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// The consumer ends of the task queue and the signal channel, shared by
/// every dispatcher.
///
/// Receiving a signal is exclusive: one dispatcher takes each signal.
#[derive(Debug)]
pub(crate) struct SharedQueue {
    tasks: Mutex<mpsc::Receiver<DeletionTask>>,
    signals: Mutex<mpsc::UnboundedReceiver<FlushSignal>>,
}

impl SharedQueue {
    pub(crate) fn new(
        tasks: mpsc::Receiver<DeletionTask>,
        signals: mpsc::UnboundedReceiver<FlushSignal>,
    ) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            signals: Mutex::new(signals),
        }
    }

    async fn next_signal(&self) -> Option<FlushSignal> {
        self.signals.lock().await.recv().await
    }

    /// Pops tasks until the queue is observed empty. Never waits for more.
    pub(crate) async fn drain(&self) -> Vec<DeletionTask> {
        let mut tasks = self.tasks.lock().await;
        let mut batch = Vec::new();
        while let Ok(task) = tasks.try_recv() {
            batch.push(task);
        }
        batch
    }
}

/// One worker of the flush dispatcher pool.
pub(crate) struct Dispatcher<S> {
    id: usize,
    store: Arc<S>,
    queue: Arc<SharedQueue>,
    cancel: CancellationToken,
}

impl<S: LinkStore> Dispatcher<S> {
    pub(crate) fn new(
        id: usize,
        store: Arc<S>,
        queue: Arc<SharedQueue>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            store,
            queue,
            cancel,
        }
    }

    /// Waits for flush signals until cancelled.
    ///
    /// Returns the store error of the first failed flush and stops; the tasks
    /// of that batch are not retried. A failed flush also cancels the rest of
    /// the pipeline, so submitters get [`PipelineError::Closed`] instead of
    /// blocking on a queue nobody drains.
    pub(crate) async fn run(self) -> Result<()> {
        loop {
            let signal = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                signal = self.queue.next_signal() => signal,
            };

            let Some(signal) = signal else {
                break;
            };
            if let Err(err) = self.flush(signal).await {
                self.cancel.cancel();
                return Err(err);
            }
        }

        debug!(dispatcher = self.id, "dispatcher stopped");
        Ok(())
    }

    async fn flush(&self, signal: FlushSignal) -> Result<usize> {
        let batch = self.queue.drain().await;
        if batch.is_empty() {
            trace!(dispatcher = self.id, reason = ?signal.reason, "nothing to flush");
            return Ok(0);
        }

        match self.store.bulk_soft_delete(&batch).await {
            Ok(flipped) => {
                debug!(
                    dispatcher = self.id,
                    reason = ?signal.reason,
                    batch_size = batch.len(),
                    flipped,
                    "flushed deletion batch"
                );
                Ok(batch.len())
            }
            Err(err) => {
                error!(
                    dispatcher = self.id,
                    batch_size = batch.len(),
                    error = %err,
                    "bulk soft delete failed, batch dropped"
                );
                Err(PipelineError::Flush(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::FlushReason;
    use async_trait::async_trait;
    use linkvault_core::error::Result as StoreResult;
    use linkvault_core::{
        Attachment, OwnerId, Resolution, ShortCode, StorageError, StoreStats, UrlRecord,
    };
    use std::sync::Mutex as StdMutex;

    /// Records every batch it receives; fails when `fail` is set.
    #[derive(Default)]
    struct RecordingStore {
        batches: StdMutex<Vec<Vec<DeletionTask>>>,
        fail: bool,
    }

    #[async_trait]
    impl LinkStore for RecordingStore {
        async fn resolve(&self, _code: &ShortCode) -> StoreResult<Resolution> {
            Ok(Resolution::NotFound)
        }

        async fn create_or_attach(
            &self,
            _owner: &OwnerId,
            _code: &ShortCode,
            _target: &str,
        ) -> StoreResult<Attachment> {
            Err(StorageError::Operation("read only".to_string()))
        }

        async fn list_by_owner(&self, _owner: &OwnerId) -> StoreResult<Vec<UrlRecord>> {
            Ok(Vec::new())
        }

        async fn bulk_soft_delete(&self, tasks: &[DeletionTask]) -> StoreResult<u64> {
            self.batches.lock().unwrap().push(tasks.to_vec());
            if self.fail {
                return Err(StorageError::Unavailable("connection reset".to_string()));
            }
            Ok(tasks.len() as u64)
        }

        async fn health_check(&self) -> StoreResult<()> {
            Ok(())
        }

        async fn stats(&self) -> StoreResult<StoreStats> {
            Ok(StoreStats::default())
        }
    }

    struct Harness {
        tasks: mpsc::Sender<DeletionTask>,
        signals: mpsc::UnboundedSender<FlushSignal>,
        store: Arc<RecordingStore>,
        cancel: CancellationToken,
        worker: tokio::task::JoinHandle<Result<()>>,
    }

    fn start(store: RecordingStore) -> Harness {
        let (tasks_tx, tasks_rx) = mpsc::channel(16);
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(SharedQueue::new(tasks_rx, signals_rx));
        let store = Arc::new(store);
        let cancel = CancellationToken::new();

        let dispatcher = Dispatcher::new(0, Arc::clone(&store), queue, cancel.clone());

        Harness {
            tasks: tasks_tx,
            signals: signals_tx,
            store,
            cancel,
            worker: tokio::spawn(dispatcher.run()),
        }
    }

    fn task(n: usize) -> DeletionTask {
        DeletionTask::new("u1", ShortCode::new_unchecked(format!("code{n}")))
    }

    fn signal() -> FlushSignal {
        FlushSignal {
            reason: FlushReason::Threshold,
            pending: 0,
        }
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn signal_drains_everything_queued_into_one_call() {
        let h = start(RecordingStore::default());
        for n in 0..5 {
            h.tasks.send(task(n)).await.unwrap();
        }

        h.signals.send(signal()).unwrap();
        settle().await;

        let batches = h.store.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], (0..5).map(task).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn empty_queue_skips_the_store() {
        let h = start(RecordingStore::default());

        h.signals.send(signal()).unwrap();
        settle().await;

        assert!(h.store.batches.lock().unwrap().is_empty());
        assert!(!h.worker.is_finished());
    }

    #[tokio::test]
    async fn failed_flush_stops_the_dispatcher() {
        let h = start(RecordingStore {
            fail: true,
            ..Default::default()
        });
        h.tasks.send(task(0)).await.unwrap();
        h.signals.send(signal()).unwrap();

        let result = h.worker.await.unwrap();
        assert!(matches!(
            result,
            Err(PipelineError::Flush(StorageError::Unavailable(_)))
        ));
        assert!(h.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_exits_without_draining() {
        let h = start(RecordingStore::default());
        h.tasks.send(task(0)).await.unwrap();

        h.cancel.cancel();
        h.worker.await.unwrap().unwrap();

        assert!(h.store.batches.lock().unwrap().is_empty());
    }
}
