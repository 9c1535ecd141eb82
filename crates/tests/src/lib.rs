//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 配置 -> 注册表 -> Dispatcher -> file/pg sinks 端到端测试
//! - 失败隔离与关闭语义

#[cfg(test)]
mod contract_tests {
    use contracts::{Batch, ConfigVersion, FailurePolicy, PipelineBlueprint, Record, RecordSet};

    #[test]
    fn test_blueprint_defaults_from_minimal_json() {
        let blueprint: PipelineBlueprint = serde_json::from_str(
            r#"{"sinks":[{"name":"out","sink_type":"file","attrs":{"path":"/tmp/out"}}]}"#,
        )
        .unwrap();

        assert_eq!(blueprint.version, ConfigVersion::V1);
        assert_eq!(blueprint.pipeline.name, "logport");
        assert_eq!(blueprint.pipeline.input_capacity, 100);
        let sink = &blueprint.sinks[0];
        assert_eq!(sink.queue_capacity, 100);
        assert_eq!(sink.on_error, FailurePolicy::Continue);
        assert_eq!(sink.max_consecutive_failures, 0);
        assert_eq!(sink.attrs["path"], "/tmp/out");
    }

    #[test]
    fn test_record_set_wire_shape() {
        let set: RecordSet = serde_json::from_str(
            r#"{"tag":"app.log","records":[{"timestamp":10,"data":{"b":1,"a":2}}]}"#,
        )
        .unwrap();
        assert_eq!(set.records[0], {
            let data = serde_json::json!({"b": 1, "a": 2});
            Record::new(10, data.as_object().cloned().unwrap())
        });
        // key order survives a round trip
        let json = serde_json::to_string(&set.records[0].data).unwrap();
        assert_eq!(json, r#"{"b":1,"a":2}"#);
        assert_eq!(Batch::from(set).record_count(), 1);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::path::Path;
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{Batch, PipelineBlueprint, Record, RecordData, RecordSet};
    use dispatcher::{
        create_dispatcher, Dispatcher, MemoryConnector, OutputRegistry, PgSinkFactory,
    };
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn config(dir: &Path, pg_extra: &str) -> PipelineBlueprint {
        let content = format!(
            r#"
[pipeline]
name = "e2e"
input_capacity = 4

[[sinks]]
name = "archive"
sink_type = "file"
[sinks.attrs]
path = "{}"

[[sinks]]
name = "warehouse"
sink_type = "pg"
backoff_initial_ms = 1
backoff_max_ms = 5
[sinks.attrs]
db_url = "postgres://logport@localhost/logs"
table_name = "events"
{pg_extra}
"#,
            dir.join("out.log").display()
        );
        ConfigLoader::load_from_str(&content, ConfigFormat::Toml).unwrap()
    }

    fn registry(connector: &MemoryConnector) -> OutputRegistry {
        let mut registry = OutputRegistry::with_builtin();
        registry.register(PgSinkFactory::new(connector.clone()));
        registry
    }

    async fn dispatcher_for(dir: &Path, connector: &MemoryConnector, pg_extra: &str) -> Dispatcher {
        let blueprint = config(dir, pg_extra);
        create_dispatcher(blueprint.sinks, &registry(connector))
            .await
            .unwrap()
    }

    fn batch(tag: &str, timestamps: &[u64]) -> Batch {
        let records = timestamps
            .iter()
            .map(|ts| {
                let mut data = RecordData::new();
                data.insert("seq".to_string(), (*ts).into());
                Record::new(*ts, data)
            })
            .collect();
        RecordSet::new(tag, records).into()
    }

    fn file_lines(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("out.log"))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// 同一批次按相同顺序到达 file 与 pg 两个 sink
    #[tokio::test]
    async fn test_fanout_to_file_and_pg() {
        let dir = tempfile::tempdir().unwrap();
        let connector = MemoryConnector::new();
        let dispatcher =
            dispatcher_for(dir.path(), &connector, r#"create_if_not_exists = "true""#).await;
        assert_eq!(dispatcher.sink_names(), ["archive", "warehouse"]);
        assert!(connector.has_table("events"));

        let (tx, rx) = mpsc::channel(4);
        let handle = dispatcher.spawn(rx);
        tx.send(batch("app", &[0, 1])).await.unwrap();
        tx.send(batch("db", &[2])).await.unwrap();
        drop(tx);

        let report = handle.await.unwrap();
        assert!(report.teardown_errors.is_none());
        assert_eq!(report.delivery.total_batches, 2);
        assert_eq!(report.delivery.total_records, 3);
        for (_, snapshot) in &report.sinks {
            assert_eq!(snapshot.write_count, 2);
            assert_eq!(snapshot.record_count, 3);
        }

        assert_eq!(
            file_lines(dir.path()),
            [
                "1970-01-01T00:00:00Z\tapp\t{\"seq\":0}",
                "1970-01-01T00:00:01Z\tapp\t{\"seq\":1}",
                "1970-01-01T00:00:02Z\tdb\t{\"seq\":2}",
            ]
        );

        let rows = connector.rows("events");
        let tags: Vec<_> = rows.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(tags, ["app", "app", "db"]);
        assert_eq!(rows[2].timestamp, "1970-01-01T00:00:02Z");
        assert_eq!(rows[2].data, r#"{"seq":2}"#);
        assert_eq!(connector.commits(), 2);
        assert_eq!(connector.closes(), 1);
    }

    /// pg 失败不影响 file sink
    #[tokio::test]
    async fn test_pg_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let connector = MemoryConnector::with_table("events");
        let mut dispatcher = dispatcher_for(dir.path(), &connector, "").await;
        let mut errors = dispatcher.take_error_receivers();
        connector.set_fail_copy(true);

        let (tx, rx) = mpsc::channel(4);
        let handle = dispatcher.spawn(rx);
        for ts in 0..3 {
            tx.send(batch("app", &[ts])).await.unwrap();
        }
        drop(tx);
        let report = handle.await.unwrap();

        assert_eq!(file_lines(dir.path()).len(), 3);
        assert!(connector.rows("events").is_empty());

        let (name, warehouse) = &report.sinks[1];
        assert_eq!(name, "warehouse");
        assert_eq!(warehouse.failure_count, 3);
        assert_eq!(report.sinks[0].1.failure_count, 0);

        let (name, rx) = &mut errors[1];
        assert_eq!(name.as_str(), "warehouse");
        let mut reported = 0;
        while rx.recv().await.is_some() {
            reported += 1;
        }
        assert_eq!(reported, 3);
    }

    /// 连接断开后下一批次重连一次并成功写入
    #[tokio::test]
    async fn test_pg_reconnects_after_connection_loss() {
        let dir = tempfile::tempdir().unwrap();
        let connector = MemoryConnector::with_table("events");
        let dispatcher = dispatcher_for(dir.path(), &connector, "").await;

        dispatcher.emit(&batch("app", &[0])).await.unwrap();
        wait_for_rows(&connector, 1).await;

        connector.kill_connections();
        dispatcher.emit(&batch("app", &[1])).await.unwrap();
        dispatcher.drain().await.unwrap();

        assert_eq!(connector.rows("events").len(), 2);
        assert_eq!(connector.connects(), 2);
        assert_eq!(file_lines(dir.path()).len(), 2);
    }

    /// 取消时放弃队列中的批次，但已写入的数据保留
    #[tokio::test]
    async fn test_cancel_stops_reading_input() {
        let dir = tempfile::tempdir().unwrap();
        let connector = MemoryConnector::with_table("events");
        let dispatcher = dispatcher_for(dir.path(), &connector, "").await;

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(dispatcher.run_until(rx, cancel.clone()));

        tx.send(batch("app", &[0])).await.unwrap();
        wait_for_rows(&connector, 1).await;
        wait_for_lines(dir.path(), 1).await;
        cancel.cancel();

        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.delivery.total_batches, 1);
        assert!(report.teardown_errors.is_none());
        assert_eq!(file_lines(dir.path()).len(), 1);
        // after cancellation nothing consumes the input anymore
        assert!(tx.send(batch("app", &[1])).await.is_err());
    }

    /// 创建失败时已创建的 sink 被关闭
    #[tokio::test]
    async fn test_sink_creation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let connector = MemoryConnector::new();
        connector.set_fail_connect(true);

        let blueprint = config(dir.path(), "");
        let result = create_dispatcher(blueprint.sinks, &registry(&connector)).await;
        assert!(result.is_err());
        assert_eq!(connector.connects(), 0);
    }

    async fn wait_for_rows(connector: &MemoryConnector, rows: usize) {
        for _ in 0..200 {
            if connector.rows("events").len() >= rows {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {rows} rows");
    }

    async fn wait_for_lines(dir: &Path, lines: usize) {
        for _ in 0..200 {
            if file_lines(dir).len() >= lines {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {lines} lines");
    }
}
