//! DataSink trait - Dispatcher output interface
//!
//! Defines the abstract interface for Sinks. Queueing, scheduling and
//! shutdown live in the dispatcher; a sink only knows how to write a batch.

use std::time::Duration;

use crate::{Batch, ContractError};

/// Data output trait
///
/// All sink implementations must implement this trait. Exactly one worker
/// drives a sink, so implementations need no internal locking.
#[trait_variant::make(DataSink: Send)]
pub trait LocalDataSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one batch
    ///
    /// Records are written in batch order. A failure aborts the rest of the
    /// batch; records already written are not retracted.
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, batch: &Batch) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink, releasing file handles / connections
    ///
    /// Called once by the worker; a second call must be harmless.
    async fn close(&mut self) -> Result<(), ContractError>;

    /// Period of the idle tick while no batch is pending (`None` = never tick)
    fn idle_interval(&self) -> Option<Duration> {
        None
    }

    /// Idle tick, only called when `idle_interval` is `Some`
    async fn idle(&mut self) -> Result<(), ContractError>;
}
