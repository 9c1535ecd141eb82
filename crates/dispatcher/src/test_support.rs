//! In-memory sink used by the unit tests of this crate

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;

use contracts::{Batch, ContractError, DataSink, Record, RecordData, RecordSet};

/// Batch with one record set of `records` empty records
pub fn batch(tag: &str, records: usize) -> Batch {
    RecordSet::new(tag, vec![Record::new(0, RecordData::new()); records]).into()
}

pub struct RecordingSink {
    name: String,
    written: Arc<Mutex<Vec<Batch>>>,
    closed: Arc<AtomicBool>,
    idle_count: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
    idle_period: Option<Duration>,
    fail_writes: bool,
    fail_close: bool,
    fail_idle: bool,
}

impl RecordingSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            written: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            idle_count: Arc::new(AtomicUsize::new(0)),
            gate: None,
            idle_period: None,
            fail_writes: false,
            fail_close: false,
            fail_idle: false,
        }
    }

    /// Every write fails
    pub fn failing(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Close fails
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Idle ticks fail
    pub fn failing_idle(mut self) -> Self {
        self.fail_idle = true;
        self
    }

    /// Each write waits for one permit of `gate()`
    pub fn blocked(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn with_idle(mut self, period: Duration) -> Self {
        self.idle_period = Some(period);
        self
    }

    pub fn written(&self) -> Arc<Mutex<Vec<Batch>>> {
        Arc::clone(&self.written)
    }

    pub fn closed(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    pub fn idle_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.idle_count)
    }

    pub fn gate(&self) -> Arc<Semaphore> {
        Arc::clone(self.gate.as_ref().expect("sink is not blocked"))
    }
}

impl DataSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, batch: &Batch) -> Result<(), ContractError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?
                .forget();
        }
        if self.fail_writes {
            return Err(ContractError::sink_write(&self.name, "mock failure"));
        }
        self.written.lock().unwrap().push(batch.clone());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(ContractError::sink_write(&self.name, "mock close failure"));
        }
        Ok(())
    }

    fn idle_interval(&self) -> Option<Duration> {
        self.idle_period
    }

    async fn idle(&mut self) -> Result<(), ContractError> {
        self.idle_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_idle {
            return Err(ContractError::sink_write(&self.name, "mock idle failure"));
        }
        Ok(())
    }
}
