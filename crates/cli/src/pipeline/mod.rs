//! Pipeline orchestration module.

mod input;
mod orchestrator;
mod stats;

pub use input::{InputSource, InputStats};
pub use orchestrator::{Pipeline, PipelineConfig};
pub use stats::PipelineStats;
