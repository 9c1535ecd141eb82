//! # Observability
//!
//! 可观测性模块：Tracing + Prometheus 指标。
//!
//! ## 功能
//!
//! - Tracing 初始化 (JSON/Pretty 格式)
//! - Prometheus 指标导出
//! - 分发与 sink 写入指标收集与统计
//! - Scorekeeper 指标注册句柄
//!
//! ## 使用示例
//!
//! ```ignore
//! use observability::{init_metrics_only, init_tracing, metrics, LogFormat};
//! use tracing_subscriber::EnvFilter;
//!
//! // 初始化
//! init_tracing(EnvFilter::new("info"), LogFormat::Json)?;
//! let keeper = init_metrics_only(9000)?;
//!
//! // 记录分发指标
//! let failed = dispatcher.emit(&batch).await.err().map_or(0, |e| e.failure_count());
//! metrics::record_batch_emitted(&batch, failed, latency_ms);
//! ```

pub mod metrics;
pub mod scorekeeper;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// Re-exports
pub use crate::metrics::{
    record_batch_emitted, record_batch_written, record_batches_abandoned, record_bytes_written,
    record_queue_depth, record_reconnect, record_rows_copied, DeliveryAggregator, MetricsSummary,
    RunningStats, StatsSummary,
};
pub use crate::scorekeeper::{MetricKind, Scorekeeper};

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志
    #[default]
    Json,
    /// 人类可读格式
    Pretty,
    /// 紧凑单行格式
    Compact,
}

/// 仅初始化 Tracing
///
/// `filter` 由调用方决定 (例如 CLI 的 -v / -q 参数)。
pub fn init_tracing(filter: EnvFilter, format: LogFormat) -> Result<()> {
    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")
}

/// 仅初始化 Prometheus 指标（不初始化 Tracing）
///
/// 用于 Tracing 已由其他模块初始化的场景。返回的 Scorekeeper 已登记内置指标，
/// 可继续交给 sink 工厂登记各自的指标。
pub fn init_metrics_only(port: u16) -> Result<Scorekeeper> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus recorder")?;

    let keeper = Scorekeeper::new();
    describe_builtin_metrics(&keeper);
    tracing::info!(port = port, "Prometheus metrics endpoint initialized");
    Ok(keeper)
}

/// 登记分发与 sink 通用指标的描述
pub fn describe_builtin_metrics(keeper: &Scorekeeper) {
    keeper.register(
        MetricKind::Counter,
        "logport_batches_emitted_total",
        "Batches handed to the dispatcher",
    );
    keeper.register(
        MetricKind::Counter,
        "logport_records_emitted_total",
        "Records handed to the dispatcher",
    );
    keeper.register(
        MetricKind::Counter,
        "logport_emit_failures_total",
        "Per-sink delivery failures during emit",
    );
    keeper.register(
        MetricKind::Histogram,
        "logport_emit_latency_ms",
        "Time spent delivering one batch to every sink",
    );
    keeper.register(
        MetricKind::Counter,
        "logport_sink_batches_total",
        "Batches processed by a sink, by status",
    );
    keeper.register(
        MetricKind::Counter,
        "logport_sink_records_total",
        "Records written by a sink",
    );
    keeper.register(
        MetricKind::Counter,
        "logport_sink_batches_abandoned_total",
        "Queued batches left unwritten at shutdown",
    );
    keeper.register(
        MetricKind::Gauge,
        "logport_sink_queue_depth",
        "Batches waiting in a sink queue",
    );
}
