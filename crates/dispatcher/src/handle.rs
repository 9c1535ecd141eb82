//! SinkHandle - manages a sink with isolated queue and worker task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use contracts::{Batch, ContractError, DataSink, FailurePolicy, SinkConfig};

use crate::error::DispatcherError;
use crate::metrics::SinkMetrics;
use crate::worker::{SinkWorker, Step};

/// Capacity of the per-sink error channel
const ERROR_CHANNEL_CAPACITY: usize = 64;

/// How a worker reacts to failed batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPolicy {
    pub on_error: FailurePolicy,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// 0 = unlimited
    pub max_consecutive_failures: u32,
}

impl Default for WorkerPolicy {
    fn default() -> Self {
        Self {
            on_error: FailurePolicy::Continue,
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_secs(30),
            max_consecutive_failures: 0,
        }
    }
}

impl WorkerPolicy {
    /// Retry delay after `failures` consecutive failures (1-based)
    ///
    /// Doubles from `backoff_initial` and never exceeds `backoff_max`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.backoff_initial
            .saturating_mul(1 << shift)
            .min(self.backoff_max)
    }

    fn gives_up_after(&self, failures: u32) -> bool {
        self.max_consecutive_failures > 0 && failures >= self.max_consecutive_failures
    }
}

impl From<&SinkConfig> for WorkerPolicy {
    fn from(config: &SinkConfig) -> Self {
        Self {
            on_error: config.on_error,
            backoff_initial: Duration::from_millis(config.backoff_initial_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }
}

/// Handle to a running sink worker
pub struct SinkHandle {
    /// Sink name
    name: String,
    /// Channel to send batches to worker
    tx: mpsc::Sender<Batch>,
    /// Stop signal shared with the worker
    cancel: CancellationToken,
    /// Shared metrics
    metrics: Arc<SinkMetrics>,
    /// Errors reported by the worker, until taken
    errors: Option<mpsc::Receiver<ContractError>>,
    /// Worker task handle
    worker_handle: JoinHandle<Result<(), ContractError>>,
}

impl SinkHandle {
    /// Spawn a worker with the default failure policy
    pub fn spawn<S: DataSink + 'static>(sink: S, queue_capacity: usize) -> Self {
        Self::spawn_with(sink, queue_capacity, WorkerPolicy::default())
    }

    /// Spawn a worker using the queue and failure settings of `config`
    pub fn spawn_for<S: DataSink + 'static>(sink: S, config: &SinkConfig) -> Self {
        Self::spawn_with(sink, config.queue_capacity, WorkerPolicy::from(config))
    }

    /// Create a new SinkHandle and spawn the worker task
    pub fn spawn_with<S: DataSink + 'static>(
        sink: S,
        queue_capacity: usize,
        policy: WorkerPolicy,
    ) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let metrics = Arc::new(SinkMetrics::new());

        let worker = SinkWorker::new(sink, rx, cancel.clone(), Arc::clone(&metrics));
        let worker_handle = tokio::spawn(run_worker(worker, policy, error_tx));

        Self {
            name,
            tx,
            cancel,
            metrics,
            errors: Some(error_rx),
            worker_handle,
        }
    }

    /// Get sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// True once the worker task has returned
    pub fn is_finished(&self) -> bool {
        self.worker_handle.is_finished()
    }

    /// Take the receiver of worker-reported errors
    ///
    /// Returns `None` after the first call. Errors are dropped (with a warning)
    /// when nobody drains the channel and it fills up.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<ContractError>> {
        self.errors.take()
    }

    /// Enqueue a batch, waiting while the queue is full
    ///
    /// # Errors
    /// `SinkClosed` if the worker has terminated.
    pub async fn accept(&self, batch: Batch) -> Result<(), DispatcherError> {
        self.tx
            .send(batch)
            .await
            .map_err(|_| self.closed_error())?;
        self.update_queue_len();
        Ok(())
    }

    /// Enqueue a batch without waiting
    ///
    /// # Errors
    /// `QueueFull` if the queue is at capacity, `SinkClosed` if the worker has
    /// terminated.
    pub fn try_accept(&self, batch: Batch) -> Result<(), DispatcherError> {
        match self.tx.try_send(batch) {
            Ok(()) => {
                self.update_queue_len();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(sink = %self.name, "Queue full, batch rejected");
                Err(DispatcherError::QueueFull {
                    sink_name: self.name.clone(),
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(self.closed_error()),
        }
    }

    /// Signal the worker to stop after its current batch; does not wait
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the worker without draining the queue
    ///
    /// The batch being written (if any) completes; queued batches are
    /// abandoned and reported. Waits for the sink to close.
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) -> Result<(), DispatcherError> {
        self.stop();
        self.join().await
    }

    /// Close the queue and wait until every queued batch has been processed
    #[instrument(name = "sink_handle_drain", skip(self), fields(sink = %self.name))]
    pub async fn drain(self) -> Result<(), DispatcherError> {
        self.join().await
    }

    async fn join(self) -> Result<(), DispatcherError> {
        let Self {
            name,
            tx,
            worker_handle,
            ..
        } = self;
        drop(tx);

        let result = match worker_handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DispatcherError::Contract(e)),
            Err(e) => {
                error!(sink = %name, error = ?e, "Worker task panicked");
                Err(DispatcherError::WorkerPanicked {
                    sink_name: name.clone(),
                    message: e.to_string(),
                })
            }
        };
        debug!(sink = %name, "SinkHandle shutdown complete");
        result
    }

    fn update_queue_len(&self) {
        let len = self.tx.max_capacity() - self.tx.capacity();
        self.metrics.set_queue_len(len);
    }

    fn closed_error(&self) -> DispatcherError {
        DispatcherError::SinkClosed {
            sink_name: self.name.clone(),
        }
    }
}

/// Worker task that drives `process` until it stops
///
/// Returns the sink's close result.
#[instrument(
    name = "sink_worker_loop",
    skip(worker, policy, errors),
    fields(sink = %worker.name())
)]
async fn run_worker<S: DataSink>(
    mut worker: SinkWorker<S>,
    policy: WorkerPolicy,
    errors: mpsc::Sender<ContractError>,
) -> Result<(), ContractError> {
    debug!(sink = %worker.name(), "Sink worker started");

    loop {
        match worker.process().await {
            Ok(Step::Continue) => {}
            Ok(Step::Stop) => break,
            Err(e) => {
                let failures = worker.consecutive_failures();
                error!(
                    sink = %worker.name(),
                    consecutive_failures = failures,
                    error = %e,
                    "Write failed"
                );
                report(&errors, worker.name(), e);

                if policy.on_error == FailurePolicy::Stop {
                    warn!(sink = %worker.name(), "Stopping sink after failure");
                    break;
                }
                if policy.gives_up_after(failures) {
                    warn!(
                        sink = %worker.name(),
                        consecutive_failures = failures,
                        "Too many consecutive failures, stopping sink"
                    );
                    break;
                }
                if failures > 0 && !worker.pause(policy.backoff(failures)).await {
                    break;
                }
            }
        }
    }

    let abandoned = worker.abandon_queued();
    if abandoned > 0 {
        report(
            &errors,
            worker.name(),
            ContractError::Abandoned {
                sink_name: worker.name().to_string(),
                batches: abandoned,
            },
        );
    }

    let closed = worker.close().await;
    debug!(sink = %worker.name(), "Sink worker stopped");
    closed
}

fn report(errors: &mpsc::Sender<ContractError>, sink: &str, error: ContractError) {
    if let Err(e) = errors.try_send(error) {
        warn!(sink = %sink, error = %e, "Error channel full or closed, error dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{batch, RecordingSink};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = WorkerPolicy {
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_millis(1_000),
            ..WorkerPolicy::default()
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = SinkConfig::new("out", "file");
        config.on_error = FailurePolicy::Stop;
        config.backoff_initial_ms = 5;
        config.max_consecutive_failures = 3;

        let policy = WorkerPolicy::from(&config);
        assert_eq!(policy.on_error, FailurePolicy::Stop);
        assert_eq!(policy.backoff_initial, Duration::from_millis(5));
        assert_eq!(policy.backoff_max, Duration::from_secs(30));
        assert!(policy.gives_up_after(3));
        assert!(!policy.gives_up_after(2));
    }

    #[tokio::test]
    async fn test_drain_writes_everything_in_order() {
        let sink = RecordingSink::new("test");
        let written = sink.written();
        let handle = SinkHandle::spawn(sink, 10);

        for i in 0..5 {
            handle.accept(batch(&format!("tag{i}"), 1)).await.unwrap();
        }
        handle.drain().await.unwrap();

        let written = written.lock().unwrap();
        let tags: Vec<_> = written.iter().map(|b| b[0].tag.clone()).collect();
        assert_eq!(tags, vec!["tag0", "tag1", "tag2", "tag3", "tag4"]);
    }

    #[tokio::test]
    async fn test_try_accept_reports_full_queue() {
        let sink = RecordingSink::new("slow").blocked();
        let gate = sink.gate();
        let handle = SinkHandle::spawn(sink, 1);

        // First batch is taken by the worker and parks on the gate,
        // the second fills the queue.
        handle.accept(batch("a", 1)).await.unwrap();
        handle.accept(batch("b", 1)).await.unwrap();
        let result = handle.try_accept(batch("c", 1));
        assert!(matches!(result, Err(DispatcherError::QueueFull { .. })));

        gate.add_permits(1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_blocks_until_space() {
        let sink = RecordingSink::new("slow").blocked();
        let gate = sink.gate();
        let written = sink.written();
        let handle = SinkHandle::spawn(sink, 1);

        handle.accept(batch("a", 1)).await.unwrap();
        handle.accept(batch("b", 1)).await.unwrap();

        {
            let third = handle.accept(batch("c", 1));
            tokio::pin!(third);
            assert!(
                tokio::time::timeout(Duration::from_millis(50), &mut third)
                    .await
                    .is_err(),
                "accept should wait while the queue is full"
            );

            gate.add_permits(3);
            third.await.unwrap();
        }
        handle.drain().await.unwrap();
        assert_eq!(written.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_abandons_queue_and_reports() {
        let sink = RecordingSink::new("slow").blocked();
        let gate = sink.gate();
        let closed = sink.closed();
        let written = sink.written();
        let mut handle = SinkHandle::spawn(sink, 4);
        let mut errors = handle.take_errors().unwrap();
        assert!(handle.take_errors().is_none());

        handle.accept(batch("a", 1)).await.unwrap();
        // Let the worker pick up the first batch and park on the gate
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.accept(batch("b", 1)).await.unwrap();
        handle.accept(batch("c", 1)).await.unwrap();

        // Release the in-flight batch only after the stop signal is raised
        let metrics = Arc::clone(handle.metrics());
        let shutdown = tokio::spawn(handle.shutdown());
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.add_permits(1);
        shutdown.await.unwrap().unwrap();

        assert_eq!(written.lock().unwrap().len(), 1);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(metrics.abandoned_count(), 2);
        assert!(matches!(
            errors.recv().await,
            Some(ContractError::Abandoned { batches: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_isolated_and_reported() {
        let sink = RecordingSink::new("failing").failing();
        let mut handle = SinkHandle::spawn_with(
            sink,
            10,
            WorkerPolicy {
                backoff_initial: Duration::from_millis(1),
                backoff_max: Duration::from_millis(2),
                ..WorkerPolicy::default()
            },
        );
        let mut errors = handle.take_errors().unwrap();

        for i in 0..3 {
            handle.accept(batch(&format!("t{i}"), 1)).await.unwrap();
        }

        for _ in 0..3 {
            assert!(matches!(
                errors.recv().await,
                Some(ContractError::SinkWrite { .. })
            ));
        }
        assert!(!handle.is_finished());
        assert_eq!(handle.metrics().failure_count(), 3);

        handle.drain().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_policy_terminates_worker() {
        let sink = RecordingSink::new("failing").failing();
        let mut handle = SinkHandle::spawn_with(
            sink,
            10,
            WorkerPolicy {
                on_error: FailurePolicy::Stop,
                ..WorkerPolicy::default()
            },
        );
        let mut errors = handle.take_errors().unwrap();

        handle.accept(batch("a", 1)).await.unwrap();
        assert!(errors.recv().await.is_some());

        // The worker exits on its own; later batches are refused
        tokio::time::timeout(Duration::from_secs(1), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(
            handle.accept(batch("b", 1)).await,
            Err(DispatcherError::SinkClosed { .. })
        ));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_max_consecutive_failures_stops_worker() {
        let sink = RecordingSink::new("failing").failing();
        let handle = SinkHandle::spawn_with(
            sink,
            10,
            WorkerPolicy {
                backoff_initial: Duration::from_millis(1),
                backoff_max: Duration::from_millis(1),
                max_consecutive_failures: 2,
                ..WorkerPolicy::default()
            },
        );
        let metrics = Arc::clone(handle.metrics());

        for i in 0..4 {
            handle.accept(batch(&format!("t{i}"), 1)).await.unwrap();
        }
        handle.drain().await.unwrap();

        assert_eq!(metrics.failure_count(), 2);
        assert_eq!(metrics.abandoned_count(), 2);
    }

    #[tokio::test]
    async fn test_close_error_surfaces_from_drain() {
        let sink = RecordingSink::new("bad_close").failing_close();
        let handle = SinkHandle::spawn(sink, 1);
        let result = handle.drain().await;
        assert!(matches!(result, Err(DispatcherError::Contract(_))));
    }
}
