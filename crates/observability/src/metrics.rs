//! 输出阶段指标收集模块
//!
//! 记录分发与各 sink 的写入指标，并在内存中聚合运行摘要。

use contracts::Batch;
use metrics::{counter, gauge, histogram};

/// 记录一次分发 (dispatcher emit)
///
/// 每次 batch 交给 dispatcher 时调用。
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_batch_emitted;
///
/// record_batch_emitted(&batch, failed_sinks, started.elapsed().as_secs_f64() * 1000.0);
/// ```
pub fn record_batch_emitted(batch: &Batch, failed_sinks: usize, latency_ms: f64) {
    counter!("logport_batches_emitted_total").increment(1);
    counter!("logport_records_emitted_total").increment(batch.record_count() as u64);
    histogram!("logport_emit_latency_ms").record(latency_ms);

    if failed_sinks > 0 {
        counter!("logport_emit_failures_total").increment(failed_sinks as u64);
    }
}

/// 记录 sink 写入结果
pub fn record_batch_written(sink_name: &str, records: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "logport_sink_batches_total",
        "sink" => sink_name.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        counter!("logport_sink_records_total", "sink" => sink_name.to_string())
            .increment(records as u64);
    }
}

/// 记录 sink 关闭时未写入的 batch
pub fn record_batches_abandoned(sink_name: &str, batches: usize) {
    counter!("logport_sink_batches_abandoned_total", "sink" => sink_name.to_string())
        .increment(batches as u64);
}

/// 记录数据库重连
pub fn record_reconnect(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "logport_sink_reconnects_total",
        "sink" => sink_name.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录文件 sink 写入的字节数 (压缩前)
pub fn record_bytes_written(sink_name: &str, bytes: usize) {
    counter!("logport_file_bytes_written_total", "sink" => sink_name.to_string())
        .increment(bytes as u64);
}

/// 记录 COPY 写入的行数
pub fn record_rows_copied(sink_name: &str, rows: u64) {
    counter!("logport_pg_rows_copied_total", "sink" => sink_name.to_string()).increment(rows);
}

/// 记录队列深度
pub fn record_queue_depth(sink_name: &str, depth: usize) {
    gauge!("logport_sink_queue_depth", "sink" => sink_name.to_string()).set(depth as f64);
}

/// 分发指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct DeliveryAggregator {
    /// 分发的 batch 总数
    pub total_batches: u64,

    /// 分发的记录总数
    pub total_records: u64,

    /// 失败的 sink 投递次数
    pub failed_deliveries: u64,

    /// 至少一个 sink 失败的 batch 数
    pub batches_with_failures: u64,

    /// batch 大小统计 (记录数)
    pub batch_size_stats: RunningStats,

    /// 分发延迟统计 (毫秒)
    pub latency_stats: RunningStats,
}

impl DeliveryAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, batch: &Batch, failed_sinks: usize, latency_ms: f64) {
        let records = batch.record_count();
        self.total_batches += 1;
        self.total_records += records as u64;

        if failed_sinks > 0 {
            self.failed_deliveries += failed_sinks as u64;
            self.batches_with_failures += 1;
        }

        self.batch_size_stats.push(records as f64);
        self.latency_stats.push(latency_ms);
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_batches: self.total_batches,
            total_records: self.total_records,
            failed_deliveries: self.failed_deliveries,
            failure_rate: if self.total_batches > 0 {
                self.batches_with_failures as f64 / self.total_batches as f64 * 100.0
            } else {
                0.0
            },
            batch_size: StatsSummary::from(&self.batch_size_stats),
            latency_ms: StatsSummary::from(&self.latency_stats),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_batches: u64,
    pub total_records: u64,
    pub failed_deliveries: u64,
    pub failure_rate: f64,
    pub batch_size: StatsSummary,
    pub latency_ms: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Delivery Summary ===")?;
        writeln!(f, "Total batches: {}", self.total_batches)?;
        writeln!(f, "Total records: {}", self.total_records)?;
        writeln!(
            f,
            "Failed deliveries: {} ({:.2}% of batches)",
            self.failed_deliveries, self.failure_rate
        )?;
        writeln!(f, "Batch size (records): {}", self.batch_size)?;
        writeln!(f, "Emit latency (ms): {}", self.latency_ms)?;
        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Record, RecordData, RecordSet};

    fn batch_of(records: usize) -> Batch {
        RecordSet::new("app.log", vec![Record::new(0, RecordData::new()); records]).into()
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = DeliveryAggregator::new();

        aggregator.update(&batch_of(3), 0, 1.5);
        aggregator.update(&batch_of(1), 2, 0.5);

        assert_eq!(aggregator.total_batches, 2);
        assert_eq!(aggregator.total_records, 4);
        assert_eq!(aggregator.failed_deliveries, 2);
        assert_eq!(aggregator.batches_with_failures, 1);

        let summary = aggregator.summary();
        assert!((summary.failure_rate - 50.0).abs() < 1e-10);
        assert_eq!(summary.batch_size.count, 2);
    }

    #[test]
    fn test_summary_display() {
        let mut aggregator = DeliveryAggregator::new();
        aggregator.update(&batch_of(2), 0, 1.0);

        let output = format!("{}", aggregator.summary());
        assert!(output.contains("Total batches: 1"));
        assert!(output.contains("Total records: 2"));
        assert!(output.contains("0.00%"));
    }

    #[test]
    fn test_record_functions_without_recorder() {
        // No global recorder installed: calls must be no-ops
        record_batch_emitted(&batch_of(1), 1, 0.1);
        record_batch_written("file", 1, true);
        record_batches_abandoned("file", 2);
        record_reconnect("pg", false);
        record_queue_depth("file", 3);
        record_bytes_written("file", 128);
        record_rows_copied("pg", 4);
    }
}
