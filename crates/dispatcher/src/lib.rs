//! # Dispatcher
//!
//! 输出阶段：sink 执行模型与分发。
//!
//! 负责：
//! - 每个 sink 一个有界队列 + 独立 worker
//! - Fan-out 同一个 `Batch` 到所有 sinks，汇总失败
//! - 停止、排空与失败退避策略
//! - 内置 `file` / `pg` sinks 及其注册表

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod registry;
pub mod sinks;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use contracts::{Batch, DataSink};
pub use dispatcher::{
    create_dispatcher, DispatchReport, Dispatcher, DispatcherBuilder, DispatcherConfig,
};
pub use error::DispatcherError;
pub use handle::{SinkHandle, WorkerPolicy};
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use registry::{OutputFactory, OutputRegistry};
pub use sinks::{
    Compression, FileSink, FileSinkConfig, FileSinkFactory, MemoryConnector, PgConnector, PgSink,
    PgSinkConfig, PgSinkFactory,
};
pub use worker::{SinkWorker, Step};
