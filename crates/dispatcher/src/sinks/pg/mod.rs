//! PgSink - bulk loads records into a PostgreSQL table with `COPY`
//!
//! Each batch becomes one transaction. Before it starts the connection is
//! pinged; a dead connection is closed and replaced once, and if that fails
//! the batch errors out and the next one tries again.

mod connector;
mod memory;

pub use connector::{DbConnection, DbConnector, PgConnector};
pub use memory::{MemoryConnection, MemoryConnector, MemoryRow};

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, trace, warn};

use contracts::{Batch, ContractError, DataSink, SinkConfig};
use observability::{MetricKind, Scorekeeper};

use super::format::{write_json, TimestampFormat};
use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::registry::OutputFactory;

const IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for PgSink
#[derive(Clone)]
pub struct PgSinkConfig {
    /// Connection URL; kept out of logs
    pub db_url: String,
    /// Plain or schema-qualified table name
    pub table_name: String,
    /// Create the table on startup if it is missing
    pub create_if_not_exists: bool,
}

impl fmt::Debug for PgSinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgSinkConfig")
            .field("db_url", &"<redacted>")
            .field("table_name", &self.table_name)
            .field("create_if_not_exists", &self.create_if_not_exists)
            .finish()
    }
}

impl PgSinkConfig {
    pub fn new(db_url: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
            table_name: table_name.into(),
            create_if_not_exists: false,
        }
    }

    /// Create config from attribute map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let required = |key: &str| {
            params
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| format!("missing required attribute '{key}'"))
        };

        let db_url = required("db_url")?;
        let table_name = required("table_name")?;
        if !is_valid_table_name(&table_name) {
            return Err(format!("invalid table_name '{table_name}'"));
        }
        let create_if_not_exists = params
            .get("create_if_not_exists")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        Ok(Self {
            db_url,
            table_name,
            create_if_not_exists,
        })
    }

    fn create_table_statement(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (id bigserial, timestamp timestamp, tag varchar(255), data json)",
            self.table_name
        )
    }

    fn copy_statement(&self) -> String {
        format!("COPY {} (tag, timestamp, data) FROM STDIN", self.table_name)
    }
}

/// `name` or `schema.name`, each part a plain SQL identifier
fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2 && parts.iter().all(|part| is_identifier(part))
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    starts_ok
        && part.len() <= 63
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Escape one field for the COPY text format
fn escape_into(out: &mut Vec<u8>, field: &[u8]) {
    for &byte in field {
        match byte {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\t' => out.extend_from_slice(b"\\t"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            other => out.push(other),
        }
    }
}

/// Sink that writes each batch with one `COPY` transaction
pub struct PgSink<C: DbConnector> {
    name: String,
    config: PgSinkConfig,
    connector: C,
    conn: Option<C::Connection>,
    copy_statement: String,
    timestamps: TimestampFormat,
    payload: Vec<u8>,
    field: Vec<u8>,
}

impl<C: DbConnector> PgSink<C> {
    /// Connect and, if configured, create the table
    #[instrument(
        name = "pg_sink_connect",
        skip(config, connector),
        fields(sink = %name, table = %config.table_name)
    )]
    pub async fn connect(
        name: &str,
        config: PgSinkConfig,
        connector: C,
    ) -> Result<Self, ContractError> {
        let name = name.to_string();
        let mut conn = connector
            .connect(&config.db_url)
            .await
            .map_err(|e| ContractError::sink_connection(&name, e.to_string()))?;

        if config.create_if_not_exists {
            info!(sink = %name, table = %config.table_name, "Creating table if missing");
            conn.execute(&config.create_table_statement())
                .await
                .map_err(|e| ContractError::sink_connection(&name, e.to_string()))?;
        }

        info!(sink = %name, table = %config.table_name, "PgSink connected");
        Ok(Self {
            name,
            copy_statement: config.copy_statement(),
            config,
            connector,
            conn: Some(conn),
            timestamps: TimestampFormat::rfc3339(),
            payload: Vec::with_capacity(4096),
            field: Vec::with_capacity(256),
        })
    }

    /// Format every record of `batch` into the COPY payload
    fn encode(&mut self, batch: &Batch) -> Result<(), ContractError> {
        self.payload.clear();
        for set in batch.iter() {
            for record in &set.records {
                escape_into(&mut self.payload, set.tag.as_bytes());
                self.payload.push(b'\t');

                self.field.clear();
                self.timestamps
                    .write_to(&mut self.field, record.timestamp)
                    .map_err(|e| ContractError::encode(&self.name, &set.tag, e.to_string()))?;
                escape_into(&mut self.payload, &self.field);
                self.payload.push(b'\t');

                self.field.clear();
                write_json(&mut self.field, &self.name, &set.tag, &record.data)?;
                escape_into(&mut self.payload, &self.field);
                self.payload.push(b'\n');
            }
        }
        Ok(())
    }

    /// Probe the connection, replacing it once if it is gone
    async fn ensure_connected(&mut self) -> Result<(), ContractError> {
        if let Some(conn) = self.conn.as_mut() {
            match conn.ping().await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(sink = %self.name, error = %e, "Connection lost, reconnecting"),
            }
        }

        if let Some(stale) = self.conn.take() {
            if let Err(e) = stale.close().await {
                debug!(sink = %self.name, error = %e, "Closing stale connection failed");
            }
        }

        match self.connector.connect(&self.config.db_url).await {
            Ok(conn) => {
                observability::record_reconnect(&self.name, true);
                info!(sink = %self.name, "Reconnected");
                self.conn = Some(conn);
                Ok(())
            }
            Err(e) => {
                observability::record_reconnect(&self.name, false);
                Err(ContractError::sink_connection(&self.name, e.to_string()))
            }
        }
    }
}

impl<C: DbConnector> DataSink for PgSink<C> {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "pg_sink_write",
        skip(self, batch),
        fields(sink = %self.name, records = batch.record_count())
    )]
    async fn write(&mut self, batch: &Batch) -> Result<(), ContractError> {
        if batch.record_count() == 0 {
            return Ok(());
        }
        self.encode(batch)?;
        self.ensure_connected().await?;

        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| ContractError::sink_connection(&self.name, "not connected"))?;
        let rows = conn
            .copy_in(&self.copy_statement, &self.payload)
            .await
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;

        observability::record_rows_copied(&self.name, rows);
        debug!(sink = %self.name, rows, "Batch copied");
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "pg_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|e| ContractError::sink_connection(&self.name, e.to_string()))?;
            debug!(sink = %self.name, "PgSink closed");
        }
        Ok(())
    }

    fn idle_interval(&self) -> Option<Duration> {
        Some(IDLE_INTERVAL)
    }

    async fn idle(&mut self) -> Result<(), ContractError> {
        trace!(sink = %self.name, "PgSink idle");
        Ok(())
    }
}

/// Factory for `sink_type = "pg"`
#[derive(Debug, Clone, Default)]
pub struct PgSinkFactory<C> {
    connector: C,
}

impl<C: DbConnector + Clone> PgSinkFactory<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl<C: DbConnector + Clone> OutputFactory for PgSinkFactory<C> {
    fn name(&self) -> &'static str {
        "pg"
    }

    async fn create(&self, config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
        let pg_config = PgSinkConfig::from_params(&config.attrs)
            .map_err(|e| DispatcherError::sink_creation(&config.name, e))?;
        let sink = PgSink::connect(&config.name, pg_config, self.connector.clone())
            .await
            .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
        Ok(SinkHandle::spawn_for(sink, config))
    }

    fn bind_scorekeeper(&self, keeper: &Scorekeeper) {
        keeper.register(
            MetricKind::Counter,
            "logport_sink_reconnects_total",
            "Database reconnect attempts, by status",
        );
        keeper.register(
            MetricKind::Counter,
            "logport_pg_rows_copied_total",
            "Rows committed by COPY",
        );
    }
}
