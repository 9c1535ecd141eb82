//! Pipeline statistics.

use std::time::Duration;

use dispatcher::DispatchReport;

use super::InputStats;

/// Statistics from a pipeline run
pub struct PipelineStats {
    /// What was read from the input
    pub input: InputStats,

    /// Total duration of the pipeline run
    pub duration: Duration,

    /// Stopped by signal or timeout rather than end of input
    pub cancelled: bool,

    /// Errors reported per sink
    pub sink_errors: Vec<(String, usize)>,

    /// Rows held by the in-memory database per pg sink (dry run only)
    pub memory_rows: Vec<(String, usize)>,

    /// Delivery and per-sink counters from the dispatcher
    pub report: DispatchReport,
}

impl PipelineStats {
    /// Records read per second
    pub fn records_per_sec(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.input.records as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Pipeline Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Lines read: {}", self.input.lines);
        println!("   ├─ Lines skipped: {}", self.input.skipped);
        println!("   ├─ Batches: {}", self.input.batches);
        println!("   ├─ Records: {}", self.input.records);
        println!("   ├─ Records/s: {:.2}", self.records_per_sec());
        println!("   └─ Stopped early: {}", self.cancelled);

        let summary = self.report.delivery.summary();
        println!("\n📈 Delivery");
        println!("   ├─ Failed deliveries: {}", summary.failed_deliveries);
        println!("   ├─ Failure rate: {:.2}%", summary.failure_rate);
        println!(
            "   └─ Emit latency (ms): mean {:.3}, max {:.3}",
            summary.latency_ms.mean, summary.latency_ms.max
        );

        if !self.report.sinks.is_empty() {
            println!("\n📤 Sinks");
            for (i, (name, snapshot)) in self.report.sinks.iter().enumerate() {
                let prefix = if i == self.report.sinks.len() - 1 {
                    "└─"
                } else {
                    "├─"
                };
                let errors = self
                    .sink_errors
                    .iter()
                    .find(|(sink, _)| sink == name)
                    .map_or(0, |(_, count)| *count);
                println!(
                    "   {} {}: {} batches, {} records, {} failures, {} abandoned, {} errors",
                    prefix,
                    name,
                    snapshot.write_count,
                    snapshot.record_count,
                    snapshot.failure_count,
                    snapshot.abandoned_count,
                    errors
                );
            }
        }

        if !self.memory_rows.is_empty() {
            println!("\n🧪 Dry run database");
            for (name, rows) in &self.memory_rows {
                println!("   ├─ {}: {} rows", name, rows);
            }
        }

        if let Some(ref e) = self.report.teardown_errors {
            println!("\n⚠️  Teardown: {}", e);
        }

        println!();
    }
}
