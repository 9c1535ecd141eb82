//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// No factory registered for the configured sink type
    #[error("unknown sink type '{sink_type}' for sink '{name}'")]
    UnknownSinkType { name: String, sink_type: String },

    /// Queue full (non-blocking accept only)
    #[error("queue full for sink '{sink_name}'")]
    QueueFull { sink_name: String },

    /// Worker has terminated; the sink accepts no more batches
    #[error("sink '{sink_name}' is closed")]
    SinkClosed { sink_name: String },

    /// One or more sinks failed to accept a batch during emit
    #[error("delivery failed for {} sink(s): {}", .failures.len(), failure_names(.failures))]
    Emit {
        failures: Vec<(String, DispatcherError)>,
    },

    /// One or more sinks failed during teardown
    #[error("teardown failed for {} sink(s): {}", .failures.len(), failure_names(.failures))]
    Teardown {
        failures: Vec<(String, DispatcherError)>,
    },

    /// Worker task panicked or was aborted
    #[error("worker for sink '{sink_name}' panicked: {message}")]
    WorkerPanicked { sink_name: String, message: String },

    /// Sink error (from contract)
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Number of sinks covered by an aggregate error (1 for single errors)
    pub fn failure_count(&self) -> usize {
        match self {
            Self::Emit { failures } | Self::Teardown { failures } => failures.len(),
            _ => 1,
        }
    }
}

fn failure_names(failures: &[(String, DispatcherError)]) -> String {
    failures
        .iter()
        .map(|(name, error)| format!("{name} ({error})"))
        .collect::<Vec<_>>()
        .join(", ")
}
