//! Pipeline orchestrator - wires input, dispatcher and sinks together.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{ContractError, PipelineBlueprint, SinkConfig};
use dispatcher::{create_dispatcher, MemoryConnector, OutputRegistry, PgSinkFactory};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{input, InputSource, PipelineStats};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The validated configuration
    pub blueprint: PipelineBlueprint,

    /// Where batches are read from
    pub input: InputSource,

    /// Pipeline timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Route `pg` sinks to an in-memory database
    pub dry_run: bool,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until the input ends or `cancel` fires
    ///
    /// End of input drains every sink; cancellation (or the timeout) shuts
    /// them down and abandons queued batches.
    pub async fn run(self, cancel: CancellationToken) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        let mut registry = OutputRegistry::with_builtin();
        let memory = self.config.dry_run.then(|| {
            let connector = dry_run_connector(blueprint);
            registry.register(PgSinkFactory::new(connector.clone()));
            info!("Dry run: pg sinks write to an in-memory database");
            connector
        });

        if let Some(port) = self.config.metrics_port {
            let keeper = observability::init_metrics_only(port)?;
            registry.bind_scorekeeper(&keeper);
            info!("Metrics endpoint available on port {}", port);
        }

        info!(
            pipeline = %blueprint.pipeline.name,
            sinks = blueprint.sinks.len(),
            "Setting up dispatcher..."
        );
        let mut dispatcher = create_dispatcher(blueprint.sinks.clone(), &registry)
            .await
            .context("Failed to create dispatcher")?;
        let error_counters = spawn_error_counters(dispatcher.take_error_receivers());

        let (tx, rx) = mpsc::channel(blueprint.pipeline.input_capacity);
        let dispatcher_handle = tokio::spawn(dispatcher.run_until(rx, cancel.clone()));

        if let Some(timeout) = self.config.timeout {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(timeout_secs = timeout.as_secs(), "Pipeline timed out");
                cancel.cancel();
            });
        }

        info!(input = ?self.config.input, "Reading input...");
        let fed = match self.config.input.open().await {
            Ok(reader) => input::feed(reader, tx, cancel.clone()).await,
            Err(e) => {
                drop(tx);
                Err(e)
            }
        };

        let report = dispatcher_handle
            .await
            .context("Dispatcher task panicked")?;
        let input = fed.context("Failed to read input")?;

        let mut sink_errors = Vec::with_capacity(error_counters.len());
        for (name, counter) in error_counters {
            sink_errors.push((name, counter.await.unwrap_or_default()));
        }

        let memory_rows = memory
            .map(|connector| {
                pg_sinks(blueprint)
                    .filter_map(|sink| {
                        let table = sink.attr("table_name")?;
                        Some((sink.name.clone(), connector.rows(table).len()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let stats = PipelineStats {
            input,
            duration: start_time.elapsed(),
            cancelled: cancel.is_cancelled(),
            sink_errors,
            memory_rows,
            report,
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            batches = stats.input.batches,
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}

fn pg_sinks(blueprint: &PipelineBlueprint) -> impl Iterator<Item = &SinkConfig> {
    blueprint.sinks.iter().filter(|sink| sink.sink_type == "pg")
}

/// Memory database with every configured pg table already present
fn dry_run_connector(blueprint: &PipelineBlueprint) -> MemoryConnector {
    let connector = MemoryConnector::new();
    for sink in pg_sinks(blueprint) {
        if let Some(table) = sink.attr("table_name") {
            connector.add_table(table);
        }
    }
    connector
}

/// Count the errors each sink reports until its worker exits
fn spawn_error_counters(
    receivers: Vec<(String, mpsc::Receiver<ContractError>)>,
) -> Vec<(String, JoinHandle<usize>)> {
    receivers
        .into_iter()
        .map(|(name, mut rx)| {
            let sink = name.clone();
            let counter = tokio::spawn(async move {
                let mut count = 0;
                while let Some(e) = rx.recv().await {
                    debug!(sink = %sink, error = %e, "Sink reported error");
                    count += 1;
                }
                count
            });
            (name, counter)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_loader::{ConfigFormat, ConfigLoader};
    use std::io::Write;

    fn blueprint(dir: &std::path::Path) -> PipelineBlueprint {
        let content = format!(
            r#"
[[sinks]]
name = "archive"
sink_type = "file"
[sinks.attrs]
path = "{}"

[[sinks]]
name = "warehouse"
sink_type = "pg"
[sinks.attrs]
db_url = "postgres://localhost/logs"
table_name = "events"
"#,
            dir.join("out.log").display()
        );
        ConfigLoader::load_from_str(&content, ConfigFormat::Toml).unwrap()
    }

    #[tokio::test]
    async fn test_dry_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut input_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            input_file,
            r#"{{"tag":"app","records":[{{"timestamp":0,"data":{{"msg":"hi"}}}}]}}"#
        )
        .unwrap();
        writeln!(input_file, "not json").unwrap();

        let config = PipelineConfig {
            blueprint: blueprint(dir.path()),
            input: InputSource::File(input_file.path().to_path_buf()),
            timeout: None,
            metrics_port: None,
            dry_run: true,
        };
        let stats = Pipeline::new(config)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.input.batches, 1);
        assert_eq!(stats.input.skipped, 1);
        assert!(!stats.cancelled);
        assert!(stats.report.teardown_errors.is_none());
        assert_eq!(stats.memory_rows, vec![("warehouse".to_string(), 1)]);

        let written = std::fs::read_to_string(dir.path().join("out.log")).unwrap();
        assert_eq!(written, "1970-01-01T00:00:00Z\tapp\t{\"msg\":\"hi\"}\n");
    }

    #[tokio::test]
    async fn test_missing_input_still_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            blueprint: blueprint(dir.path()),
            input: InputSource::File(dir.path().join("missing.jsonl")),
            timeout: None,
            metrics_port: None,
            dry_run: true,
        };
        let result = Pipeline::new(config).run(CancellationToken::new()).await;
        assert!(result.is_err());
    }
}
