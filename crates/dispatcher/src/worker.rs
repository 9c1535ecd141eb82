//! SinkWorker - single-consumer process loop for one sink
//!
//! `process` is one unit of work: wait for the stop signal, the next batch or
//! an idle tick, then act on whichever comes first. The stop signal is always
//! checked first, so no batch is started once it is raised.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

use contracts::{Batch, ContractError, DataSink};

use crate::metrics::SinkMetrics;

/// Outcome of one `process` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Call `process` again
    Continue,
    /// Clean termination: stop requested or queue closed and empty
    Stop,
}

enum Event {
    Stop,
    Batch(Option<Batch>),
    Tick,
}

/// Owns a sink together with the receiving end of its queue
pub struct SinkWorker<S> {
    sink: S,
    name: String,
    rx: mpsc::Receiver<Batch>,
    cancel: CancellationToken,
    metrics: Arc<SinkMetrics>,
    idle: Option<Interval>,
    consecutive_failures: u32,
}

impl<S: DataSink> SinkWorker<S> {
    /// Create a worker; `cancel` is the stop signal shared with the handle
    pub fn new(
        sink: S,
        rx: mpsc::Receiver<Batch>,
        cancel: CancellationToken,
        metrics: Arc<SinkMetrics>,
    ) -> Self {
        let name = sink.name().to_string();
        let idle = sink.idle_interval().map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        Self {
            sink,
            name,
            rx,
            cancel,
            metrics,
            idle,
            consecutive_failures: 0,
        }
    }

    /// Sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Failed batches since the last successful one
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run one unit of work
    ///
    /// # Errors
    /// The sink's write or idle error; the caller decides whether to go on.
    #[instrument(name = "sink_worker_process", skip(self), fields(sink = %self.name))]
    pub async fn process(&mut self) -> Result<Step, ContractError> {
        let event = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Event::Stop,
            batch = self.rx.recv() => Event::Batch(batch),
            _ = idle_tick(&mut self.idle) => Event::Tick,
        };

        match event {
            Event::Stop => {
                debug!(sink = %self.name, "Stop signal observed");
                Ok(Step::Stop)
            }
            Event::Batch(None) => {
                debug!(sink = %self.name, "Queue closed and drained");
                Ok(Step::Stop)
            }
            Event::Batch(Some(batch)) => {
                self.metrics.set_queue_len(self.rx.len());
                observability::record_queue_depth(&self.name, self.rx.len());
                self.write(&batch).await?;
                Ok(Step::Continue)
            }
            Event::Tick => {
                trace!(sink = %self.name, "Idle tick");
                self.idle().await?;
                Ok(Step::Continue)
            }
        }
    }

    async fn write(&mut self, batch: &Batch) -> Result<(), ContractError> {
        let records = batch.record_count();
        match self.sink.write(batch).await {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.metrics.inc_write_count(records);
                observability::record_batch_written(&self.name, records, true);
                Ok(())
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.metrics.inc_failure_count();
                observability::record_batch_written(&self.name, records, false);
                Err(e)
            }
        }
    }

    async fn idle(&mut self) -> Result<(), ContractError> {
        match self.sink.idle().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.metrics.inc_failure_count();
                Err(e)
            }
        }
    }

    /// Sleep for `delay` unless the stop signal arrives first
    ///
    /// Returns false if stopped.
    pub async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Close the queue and count the batches that will never be written
    pub fn abandon_queued(&mut self) -> usize {
        self.rx.close();
        let mut abandoned = 0;
        while self.rx.try_recv().is_ok() {
            abandoned += 1;
        }

        if abandoned > 0 {
            warn!(sink = %self.name, batches = abandoned, "Queued batches abandoned at stop");
            self.metrics.add_abandoned(abandoned);
            observability::record_batches_abandoned(&self.name, abandoned);
        }
        self.metrics.set_queue_len(0);
        abandoned
    }

    /// Flush and close the sink
    ///
    /// Close is attempted even if flush fails; the first error is returned.
    #[instrument(name = "sink_worker_close", skip(self), fields(sink = %self.name))]
    pub async fn close(&mut self) -> Result<(), ContractError> {
        let flushed = self.sink.flush().await;
        if let Err(e) = &flushed {
            error!(sink = %self.name, error = %e, "Flush failed on shutdown");
        }
        let closed = self.sink.close().await;
        if let Err(e) = &closed {
            error!(sink = %self.name, error = %e, "Close failed on shutdown");
        }
        flushed.and(closed)
    }
}

async fn idle_tick(idle: &mut Option<Interval>) {
    match idle {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
