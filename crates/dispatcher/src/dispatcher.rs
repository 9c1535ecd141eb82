//! Dispatcher - main loop for fan-out to sinks

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use contracts::{Batch, ContractError, SinkConfig};
use observability::DeliveryAggregator;

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::MetricsSnapshot;
use crate::registry::OutputRegistry;

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Sink configurations, in fan-out order
    pub sinks: Vec<SinkConfig>,
}

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder<'a> {
    config: DispatcherConfig,
    registry: &'a OutputRegistry,
}

impl<'a> DispatcherBuilder<'a> {
    /// Create a new DispatcherBuilder
    pub fn new(config: DispatcherConfig, registry: &'a OutputRegistry) -> Self {
        Self { config, registry }
    }

    /// Create every configured sink and start its worker
    ///
    /// If one sink fails to initialize, the sinks already started are shut
    /// down before the error is returned.
    #[instrument(
        name = "dispatcher_builder_build",
        skip(self),
        fields(sink_count = self.config.sinks.len())
    )]
    pub async fn build(self) -> Result<Dispatcher, DispatcherError> {
        let mut handles = Vec::with_capacity(self.config.sinks.len());
        for sink_config in &self.config.sinks {
            match self.registry.create(sink_config).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(sink = %sink_config.name, error = %e, "Sink initialization failed");
                    Dispatcher::with_handles(handles).shutdown().await.ok();
                    return Err(e);
                }
            }
        }

        Ok(Dispatcher::with_handles(handles))
    }
}

/// Summary returned by `Dispatcher::run`
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Emit statistics
    pub delivery: DeliveryAggregator,
    /// Final metrics per sink, in fan-out order
    pub sinks: Vec<(String, MetricsSnapshot)>,
    /// Sinks that failed to drain or close
    pub teardown_errors: Option<DispatcherError>,
}

/// The main Dispatcher that fans out batches to sinks
pub struct Dispatcher {
    handles: Vec<SinkHandle>,
}

impl Dispatcher {
    /// Dispatcher without sinks
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Create a dispatcher with custom sink handles
    pub fn with_handles(handles: Vec<SinkHandle>) -> Self {
        Self { handles }
    }

    /// Append a sink; it receives batches emitted from now on
    pub fn add_sink(&mut self, handle: SinkHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Sink names in fan-out order
    pub fn sink_names(&self) -> Vec<&str> {
        self.handles.iter().map(SinkHandle::name).collect()
    }

    /// Get metrics for all sinks
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Take the error receivers of all sinks (each only once)
    pub fn take_error_receivers(&mut self) -> Vec<(String, mpsc::Receiver<ContractError>)> {
        self.handles
            .iter_mut()
            .filter_map(|h| {
                let name = h.name().to_string();
                h.take_errors().map(|rx| (name, rx))
            })
            .collect()
    }

    /// Hand `batch` to every sink, in registration order
    ///
    /// Waits on each full queue in turn. A sink that refuses the batch does
    /// not keep the others from getting it; all refusals are returned
    /// together as `DispatcherError::Emit`.
    pub async fn emit(&self, batch: &Batch) -> Result<(), DispatcherError> {
        let mut failures = Vec::new();
        for handle in &self.handles {
            if let Err(e) = handle.accept(batch.clone()).await {
                warn!(sink = %handle.name(), error = %e, "Sink refused batch");
                failures.push((handle.name().to_string(), e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatcherError::Emit { failures })
        }
    }

    /// Run until the input channel closes, then drain every sink
    #[instrument(name = "dispatcher_run", skip(self, input_rx))]
    pub async fn run(self, input_rx: mpsc::Receiver<Batch>) -> DispatchReport {
        self.run_until(input_rx, CancellationToken::new()).await
    }

    /// Run until the input channel closes or `cancel` fires
    ///
    /// Closed input drains the sinks; cancellation shuts them down and
    /// abandons whatever is still queued.
    #[instrument(name = "dispatcher_run_until", skip(self, input_rx, cancel))]
    pub async fn run_until(
        self,
        mut input_rx: mpsc::Receiver<Batch>,
        cancel: CancellationToken,
    ) -> DispatchReport {
        info!(sinks = self.handles.len(), "Dispatcher started");

        let mut delivery = DeliveryAggregator::new();
        let mut cancelled = false;

        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                batch = input_rx.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            let started = Instant::now();
            let failed_sinks = match self.emit(&batch).await {
                Ok(()) => 0,
                Err(e) => {
                    error!(error = %e, "Emit failed");
                    e.failure_count()
                }
            };
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            observability::record_batch_emitted(&batch, failed_sinks, latency_ms);
            delivery.update(&batch, failed_sinks, latency_ms);

            if delivery.total_batches.is_multiple_of(100) {
                debug!(batches = delivery.total_batches, "Dispatcher progress");
            }
        }

        let sink_metrics: Vec<_> = self
            .handles
            .iter()
            .map(|h| (h.name().to_string(), Arc::clone(h.metrics())))
            .collect();
        let teardown = if cancelled {
            info!(batches = delivery.total_batches, "Dispatcher cancelled, shutting down");
            self.shutdown().await
        } else {
            info!(batches = delivery.total_batches, "Dispatcher input closed, draining");
            self.drain().await
        };
        info!("Dispatcher shutdown complete");

        let sinks = sink_metrics
            .into_iter()
            .map(|(name, metrics)| (name, metrics.snapshot()))
            .collect();
        DispatchReport {
            delivery,
            sinks,
            teardown_errors: teardown.err(),
        }
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self, input_rx: mpsc::Receiver<Batch>) -> JoinHandle<DispatchReport> {
        tokio::spawn(self.run(input_rx))
    }

    /// Stop every sink, abandoning queued batches
    ///
    /// Every sink is signalled before any of them is awaited.
    #[instrument(name = "dispatcher_shutdown", skip(self))]
    pub async fn shutdown(self) -> Result<(), DispatcherError> {
        for handle in &self.handles {
            handle.stop();
        }

        let mut failures = Vec::new();
        for handle in self.handles {
            let name = handle.name().to_string();
            if let Err(e) = handle.shutdown().await {
                failures.push((name, e));
            }
        }
        teardown_result(failures)
    }

    /// Close every queue and wait until all queued batches are written
    #[instrument(name = "dispatcher_drain", skip(self))]
    pub async fn drain(self) -> Result<(), DispatcherError> {
        let mut failures = Vec::new();
        for handle in self.handles {
            let name = handle.name().to_string();
            if let Err(e) = handle.drain().await {
                failures.push((name, e));
            }
        }
        teardown_result(failures)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn teardown_result(failures: Vec<(String, DispatcherError)>) -> Result<(), DispatcherError> {
    if failures.is_empty() {
        Ok(())
    } else {
        for (name, e) in &failures {
            error!(sink = %name, error = %e, "Sink teardown failed");
        }
        Err(DispatcherError::Teardown { failures })
    }
}

/// Convenience function to create a dispatcher from sink configs
#[instrument(name = "dispatcher_create", skip(sink_configs, registry))]
pub async fn create_dispatcher(
    sink_configs: Vec<SinkConfig>,
    registry: &OutputRegistry,
) -> Result<Dispatcher, DispatcherError> {
    let config = DispatcherConfig {
        sinks: sink_configs,
    };
    DispatcherBuilder::new(config, registry).build().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{batch, RecordingSink};
    use std::time::Duration;

    #[tokio::test]
    async fn test_dispatcher_fanout() {
        let sink1 = RecordingSink::new("sink1");
        let sink2 = RecordingSink::new("sink2");
        let written1 = sink1.written();
        let written2 = sink2.written();

        let mut dispatcher = Dispatcher::new();
        dispatcher.add_sink(SinkHandle::spawn(sink1, 10));
        dispatcher.add_sink(SinkHandle::spawn(sink2, 10));
        assert_eq!(dispatcher.sink_names(), vec!["sink1", "sink2"]);

        let (input_tx, input_rx) = mpsc::channel(10);
        let handle = dispatcher.spawn(input_rx);

        for i in 0..5 {
            input_tx.send(batch(&format!("t{i}"), 2)).await.unwrap();
        }
        drop(input_tx);

        let report = handle.await.unwrap();
        assert!(report.teardown_errors.is_none());
        assert_eq!(report.delivery.total_batches, 5);
        assert_eq!(report.delivery.total_records, 10);

        let written1 = written1.lock().unwrap();
        let written2 = written2.lock().unwrap();
        assert_eq!(written1.len(), 5);
        assert_eq!(written2.len(), 5);
        // Both sinks received the very same batch, not a copy
        assert!(written1[0].ptr_eq(&written2[0]));
    }

    #[tokio::test]
    async fn test_emit_aggregates_failures_and_reaches_healthy_sinks() {
        let healthy = RecordingSink::new("healthy");
        let written = healthy.written();

        let closed = SinkHandle::spawn_with(
            RecordingSink::new("broken").failing(),
            1,
            crate::handle::WorkerPolicy {
                on_error: contracts::FailurePolicy::Stop,
                ..Default::default()
            },
        );
        let dispatcher = Dispatcher::with_handles(vec![closed, SinkHandle::spawn(healthy, 10)]);

        // First batch kills the failing sink's worker
        dispatcher.emit(&batch("a", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = dispatcher.emit(&batch("b", 1)).await.unwrap_err();
        match &err {
            DispatcherError::Emit { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }

        dispatcher.drain().await.unwrap();
        assert_eq!(written.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_dispatcher_emit_is_noop() {
        let dispatcher = Dispatcher::default();
        assert!(dispatcher.is_empty());
        dispatcher.emit(&batch("a", 1)).await.unwrap();
        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_until_cancel_shuts_down() {
        let sink = RecordingSink::new("slow").blocked();
        let gate = sink.gate();
        let closed = sink.closed();
        let dispatcher = Dispatcher::with_handles(vec![SinkHandle::spawn(sink, 10)]);

        let (input_tx, input_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let run = tokio::spawn(dispatcher.run_until(input_rx, cancel.clone()));

        for i in 0..3 {
            input_tx.send(batch(&format!("t{i}"), 1)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.add_permits(1);

        let report = run.await.unwrap();
        assert!(report.teardown_errors.is_none());
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(report.delivery.total_batches, 3);
        assert_eq!(report.sinks[0].1.write_count, 1);
        assert_eq!(report.sinks[0].1.abandoned_count, 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_sinks_before_waiting() {
        let slow = RecordingSink::new("slow").blocked();
        let fast = RecordingSink::new("fast").blocked();
        let slow_gate = slow.gate();
        let fast_gate = fast.gate();
        let slow_written = slow.written();
        let fast_written = fast.written();
        let dispatcher = Dispatcher::with_handles(vec![
            SinkHandle::spawn(slow, 10),
            SinkHandle::spawn(fast, 10),
        ]);

        for i in 0..3 {
            dispatcher.emit(&batch(&format!("t{i}"), 1)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let shutdown = tokio::spawn(dispatcher.shutdown());
        tokio::time::sleep(Duration::from_millis(20)).await;

        // "slow" is still mid-write; "fast" must not pick up its queue
        fast_gate.add_permits(10);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fast_written.lock().unwrap().len(), 1);

        slow_gate.add_permits(1);
        shutdown.await.unwrap().unwrap();
        assert_eq!(slow_written.lock().unwrap().len(), 1);
        assert_eq!(fast_written.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_teardown_errors_are_aggregated() {
        let dispatcher = Dispatcher::with_handles(vec![
            SinkHandle::spawn(RecordingSink::new("a").failing_close(), 1),
            SinkHandle::spawn(RecordingSink::new("b"), 1),
            SinkHandle::spawn(RecordingSink::new("c").failing_close(), 1),
        ]);

        match dispatcher.drain().await {
            Err(DispatcherError::Teardown { failures }) => {
                let names: Vec<_> = failures.iter().map(|(n, _)| n.as_str()).collect();
                assert_eq!(names, vec!["a", "c"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
