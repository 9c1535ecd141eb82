//! PipelineBlueprint - Config Loader output
//!
//! Describes the output stage: pipeline settings plus the ordered sink list.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete output stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineBlueprint {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Pipeline-wide settings
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Sinks, in fan-out order
    pub sinks: Vec<SinkConfig>,
}

/// Pipeline-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Instance name, used in logs
    #[serde(default = "default_pipeline_name")]
    pub name: String,

    /// Capacity of the producer -> dispatcher channel
    #[serde(default = "default_queue_capacity")]
    pub input_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            name: default_pipeline_name(),
            input_capacity: default_queue_capacity(),
        }
    }
}

fn default_pipeline_name() -> String {
    "logport".to_string()
}

/// Sink output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink name
    pub name: String,

    /// Registry key of the sink implementation (`file`, `pg`, ...)
    pub sink_type: String,

    /// Queue capacity (batches)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// What the worker does after a failed batch
    #[serde(default)]
    pub on_error: FailurePolicy,

    /// First retry delay after a failure
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Upper bound of the retry delay
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Consecutive failures before the sink is stopped (0 = unlimited)
    #[serde(default)]
    pub max_consecutive_failures: u32,

    /// Type-specific attributes
    #[serde(default)]
    pub attrs: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

fn default_backoff_initial_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

impl SinkConfig {
    /// Config with default queue and failure settings
    pub fn new(name: impl Into<String>, sink_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sink_type: sink_type.into(),
            queue_capacity: default_queue_capacity(),
            on_error: FailurePolicy::default(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_consecutive_failures: 0,
            attrs: HashMap::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Attribute lookup
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }
}

/// Worker reaction to a failed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Report, back off, continue with the next batch
    #[default]
    Continue,
    /// Report and stop the sink
    Stop,
}
