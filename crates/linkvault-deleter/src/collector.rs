use crate::error::{PipelineError, Result};
use linkvault_core::DeletionTask;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Why the collector raised a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The submission count since the last flush reached the threshold.
    Threshold,
    /// The flush interval elapsed with tasks pending.
    Idle,
}

/// A request for one dispatcher to drain the task queue.
///
/// It does not carry the tasks; `pending` is only the number of submissions
/// the collector counted since the previous flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSignal {
    pub reason: FlushReason,
    pub pending: usize,
}

/// Cloneable handle that callers use to queue deletion tasks.
#[derive(Debug, Clone)]
pub struct DeletionSubmitter {
    tasks: mpsc::Sender<DeletionTask>,
    submitted: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
}

impl DeletionSubmitter {
    pub(crate) fn new(
        tasks: mpsc::Sender<DeletionTask>,
        submitted: mpsc::UnboundedSender<()>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tasks,
            submitted,
            cancel,
        }
    }

    /// Queues `task`, waiting while the queue is full.
    ///
    /// Only fails with [`PipelineError::Closed`] once the pipeline has been
    /// stopped, including while this call is waiting for room.
    pub async fn submit(&self, task: DeletionTask) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(PipelineError::Closed),
            sent = self.tasks.send(task) => sent.map_err(|_| PipelineError::Closed)?,
        }

        // The collector is gone only after cancellation; the task stays queued
        // for a final drain either way.
        let _ = self.submitted.send(());
        Ok(())
    }

    /// Number of free slots in the task queue.
    pub fn available_capacity(&self) -> usize {
        self.tasks.capacity()
    }
}

/// Single-owner state machine that decides when to flush.
///
/// It counts submissions since the last flush and raises a [`FlushSignal`]
/// when the count reaches `threshold` or when `interval` elapses with tasks
/// pending. The deadline moves forward on every flush, not on every
/// submission.
pub(crate) struct BatchCollector {
    submitted: mpsc::UnboundedReceiver<()>,
    signals: mpsc::UnboundedSender<FlushSignal>,
    threshold: usize,
    interval: Duration,
    cancel: CancellationToken,
}

impl BatchCollector {
    pub(crate) fn new(
        submitted: mpsc::UnboundedReceiver<()>,
        signals: mpsc::UnboundedSender<FlushSignal>,
        threshold: usize,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            submitted,
            signals,
            threshold,
            interval,
            cancel,
        }
    }

    /// Runs until cancelled. Never forces a flush on the way out.
    pub(crate) async fn run(mut self) {
        let mut pending = 0usize;
        let mut deadline = Instant::now() + self.interval;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(pending, "collector stopped");
                    return;
                }
                _ = sleep_until(deadline) => {
                    if pending > 0 {
                        self.raise(FlushReason::Idle, pending);
                    }
                    pending = 0;
                    deadline = Instant::now() + self.interval;
                }
                event = self.submitted.recv() => {
                    let Some(()) = event else {
                        debug!(pending, "all submitters dropped, collector stopped");
                        return;
                    };
                    pending += 1;
                    if pending >= self.threshold {
                        self.raise(FlushReason::Threshold, pending);
                        pending = 0;
                        deadline = Instant::now() + self.interval;
                    }
                }
            }
        }
    }

    fn raise(&self, reason: FlushReason, pending: usize) {
        trace!(?reason, pending, "raising flush signal");
        // Dispatchers hold the receiver for the pipeline's lifetime.
        let _ = self.signals.send(FlushSignal { reason, pending });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkvault_core::ShortCode;

    struct Harness {
        submitter: DeletionSubmitter,
        tasks: mpsc::Receiver<DeletionTask>,
        signals: mpsc::UnboundedReceiver<FlushSignal>,
        cancel: CancellationToken,
        collector: tokio::task::JoinHandle<()>,
    }

    fn start(capacity: usize, threshold: usize, interval: Duration) -> Harness {
        let (tasks_tx, tasks) = mpsc::channel(capacity);
        let (submitted_tx, submitted_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let collector = BatchCollector::new(
            submitted_rx,
            signals_tx,
            threshold,
            interval,
            cancel.clone(),
        );

        Harness {
            submitter: DeletionSubmitter::new(tasks_tx, submitted_tx, cancel.clone()),
            tasks,
            signals,
            cancel,
            collector: tokio::spawn(collector.run()),
        }
    }

    fn task(n: usize) -> DeletionTask {
        DeletionTask::new("u1", ShortCode::new_unchecked(format!("code{n}")))
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_raises_flush_without_waiting_for_interval() {
        let mut h = start(50, 20, Duration::from_secs(10));
        let started = Instant::now();

        for n in 0..20 {
            h.submitter.submit(task(n)).await.unwrap();
        }

        let signal = h.signals.recv().await.unwrap();
        assert_eq!(
            signal,
            FlushSignal {
                reason: FlushReason::Threshold,
                pending: 20
            }
        );
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn interval_raises_flush_for_a_trickle() {
        let mut h = start(50, 20, Duration::from_secs(10));

        for n in 0..19 {
            h.submitter.submit(task(n)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_secs(11)).await;
        let signal = h.signals.try_recv().unwrap();
        assert_eq!(
            signal,
            FlushSignal {
                reason: FlushReason::Idle,
                pending: 19
            }
        );
        assert!(h.signals.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_interval_without_submissions_is_silent() {
        let mut h = start(50, 20, Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(h.signals.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_restarts_after_threshold_flush() {
        let mut h = start(50, 2, Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(8)).await;
        h.submitter.submit(task(0)).await.unwrap();
        h.submitter.submit(task(1)).await.unwrap();
        h.submitter.submit(task(2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.signals.try_recv().unwrap().reason, FlushReason::Threshold);

        // The original deadline (t=10s) must not fire for the third task.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.signals.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            h.signals.try_recv().unwrap(),
            FlushSignal {
                reason: FlushReason::Idle,
                pending: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_blocks_submitter() {
        let mut h = start(2, 20, Duration::from_secs(10));
        h.submitter.submit(task(0)).await.unwrap();
        h.submitter.submit(task(1)).await.unwrap();
        assert_eq!(h.submitter.available_capacity(), 0);

        let submitter = h.submitter.clone();
        let blocked = tokio::spawn(async move { submitter.submit(task(2)).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!blocked.is_finished());

        h.tasks.recv().await.unwrap();
        blocked.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_collector_and_rejects_submissions() {
        let mut h = start(2, 20, Duration::from_secs(10));
        h.submitter.submit(task(0)).await.unwrap();
        h.submitter.submit(task(1)).await.unwrap();

        let submitter = h.submitter.clone();
        let blocked = tokio::spawn(async move { submitter.submit(task(2)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.cancel.cancel();
        h.collector.await.unwrap();

        assert!(matches!(
            blocked.await.unwrap(),
            Err(PipelineError::Closed)
        ));
        assert!(matches!(
            h.submitter.submit(task(3)).await,
            Err(PipelineError::Closed)
        ));
        // Cancellation does not flush.
        assert!(h.signals.try_recv().is_err());
    }
}
